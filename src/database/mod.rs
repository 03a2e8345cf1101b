mod driver;
mod file;
mod mysql;
mod postgres;
mod process;

pub use driver::{DatabaseDriver, DumpSink};
pub use file::FileDriver;
pub use mysql::MysqlDriver;
pub use postgres::PostgresDriver;

use crate::config::{DatabaseConfig, DatabaseKind};

/// Timeout for connection probes and for the clients' own connect phase.
/// Dumps and restores themselves are not bounded.
pub const CONNECT_TIMEOUT_SECS: u64 = 5;

pub fn create_driver(config: &DatabaseConfig) -> Box<dyn DatabaseDriver> {
    match config.kind {
        DatabaseKind::File => Box::new(FileDriver::new(config)),
        DatabaseKind::MySQL => Box::new(MysqlDriver::new(config)),
        DatabaseKind::Postgres => Box::new(PostgresDriver::new(config)),
    }
}
