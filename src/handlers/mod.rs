mod auth;
mod chat;
mod render;

pub use auth::{serve_login_page, handle_login, handle_register, handle_logout, USER_SESSION_KEY};
pub use chat::{serve_chat_page, handle_message, handle_wipe, thread_messages};
