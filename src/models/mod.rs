mod params;
mod rows;
mod transfer_tx;

pub use params::{
    AddAccountBalanceParams, CreateAccountParams, CreateEntryParams, CreateTransferParams, ListAccountsParams,
    ListEntriesParams, ListTransfersParams, UpdateAccountParams, UpdateEntryParams, UpdateTransferParams
};
pub use rows::{Account, Entry, Transfer};
pub use transfer_tx::{TransferTxParams, TransferTxResult, TxContext};
