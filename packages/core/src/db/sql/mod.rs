//! Row-store backend (generic SQL driver)

mod ddl;
mod driver;
mod ops;
mod store;
mod tx;

pub use driver::{LibsqlDriver, SqlConnection, SqlDriver};
pub use store::RowStore;
pub use tx::RowTransaction;
