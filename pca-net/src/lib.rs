// pca-net/src/lib.rs
pub mod control;
pub mod headers;
pub mod http;

pub use control::{BuildSource, ControlPlane};
pub use headers::parse_artifact_head;
pub use http::RestClient;
