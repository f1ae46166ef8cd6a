pub mod chat_socket;
pub mod http;
