//! Client side of the dynamic access key listing protocol: the paginated
//! list controller and the data sources it can drive.

pub mod controller;
pub mod error;
pub mod http;
pub mod in_process;
pub mod source;

pub use controller::{FetchOutcome, ListController, ListQuery, ViewModel};
pub use error::ListError;
pub use http::HttpDataSource;
pub use in_process::InProcessDataSource;
pub use source::{AccessKeyLinks, DataSource, MutationSink, Record, RecordKey};
