//! `mailquery`: query planning and execution for mailbox search.
//!
//! A search query is compiled into a tree of operations, optimized, and
//! executed against two stores: a relational store of item metadata and a
//! full-text index. Results stream back in sort order, deduplicated, with
//! cursor-based pagination.
//!
//! ```no_run
//! use mailquery::backend::memory::MemoryMailbox;
//! use mailquery::search::{Clause, SearchParams, Searcher};
//!
//! # fn main() -> mailquery::error::Result<()> {
//! let mailbox = MemoryMailbox::load(std::path::Path::new("mailbox.json"))?;
//! let searcher = Searcher::new(&mailbox, &mailbox);
//! let mut results = searcher.search(&Clause::tag("work"), SearchParams::default())?;
//! while let Some(hit) = results.next()? {
//!     println!("{}", hit.item_id);
//! }
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod constraint;
pub mod error;
pub mod model;
pub mod ops;
pub mod search;
