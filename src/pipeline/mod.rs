pub mod audit;
pub mod config;
pub mod hasher;
pub mod ingest;
pub mod ledger;
pub mod naming;
pub mod paths;
pub mod query;
pub mod record;
pub mod router;
pub mod scaffold;
pub mod stabilize;
pub mod util;
pub mod warn;
