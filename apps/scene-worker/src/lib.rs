//! Scene streaming worker: schedules asset fetches against a scene service, decodes the
//! length-prefixed responses into scene commands and forwards them to a host.

pub mod config;
pub mod dispatcher;
pub mod endpoints;
pub mod error;
pub mod fetch;
pub mod host;
pub mod metrics;
pub mod pipeline;
pub mod priority;
pub mod scheduler;
pub mod sequencer;
pub mod stdio;
pub mod telemetry;
pub mod tile_width;

pub use dispatcher::{Dispatcher, Flow};
pub use error::{ErrorReport, FetchError, WorkerError, WorkerResult};
pub use fetch::{Fetcher, HttpFetcher, RequestHeaders};
pub use host::{ChannelPort, HostMessage, HostPort, OutboundMessage};
pub use scheduler::{RequestContext, RequestScheduler};
pub use tile_width::TileWidthTable;
