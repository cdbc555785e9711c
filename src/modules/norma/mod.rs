pub mod controller;
pub mod error;
pub mod model;
pub mod prompt;
pub mod retriever;
pub mod routes;
pub mod sanitizer;
pub mod schema;
pub mod streamer;
