pub mod liveness_handler;
pub mod multipart_form;
pub mod stream_handler;
