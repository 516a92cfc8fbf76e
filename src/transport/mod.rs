mod http_backend;

pub use http_backend::{completions_url, map_reqwest_error, HttpBackend};
