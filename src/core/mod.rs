pub mod chain;
pub mod nexus;
pub mod receipt;
pub mod transaction;
pub mod units;
