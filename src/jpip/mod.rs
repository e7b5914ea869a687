pub mod aux_channel;
pub mod client;
pub mod http_transport;
pub mod response_headers;
pub mod view_window;
