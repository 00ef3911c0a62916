pub mod backend;
pub mod triton_http;
