//! Concrete [`ClientWrapper`](crate::client_wrapper::ClientWrapper)
//! implementations. Only an OpenAI-compatible Chat Completions adapter
//! ships in this crate; the trait seam is what lets additional backends
//! be added without touching [`crate::agent`].

pub mod common;
pub mod openai;
