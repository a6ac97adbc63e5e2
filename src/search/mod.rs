//! Search entry point: compile a query, plan it, and stream the results.

pub mod compile;
pub mod pager;

use std::collections::{BTreeSet, VecDeque};

use tracing::debug;

use crate::backend::{BackendStatistics, RelationalBackend, SelectivityOracle, TextIndex};
use crate::config::{Config, OptimizerConfig, PlannerConfig};
use crate::error::{Result, SearchError};
use crate::model::{
    folders, Cursor, FetchMode, FolderId, Hit, ItemType, PageDirection, ResultInfo, SortOrder,
};
use crate::ops::{Lookahead, Operation, QueryContext};

pub use compile::{compile, Clause, RangeClause};
pub use pager::CursorResolver;

/// What the caller wants back from a search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchParams {
    pub sort: SortOrder,
    /// Result types; empty means every type.
    pub types: BTreeSet<ItemType>,
    pub fetch: FetchMode,
    pub cursor: Option<Cursor>,
    pub direction: PageDirection,
    pub include_trash: bool,
    pub include_spam: bool,
    /// Hits expected per round trip; the planner default when unset.
    pub chunk_size: Option<usize>,
}

impl SearchParams {
    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_types(mut self, types: impl IntoIterator<Item = ItemType>) -> Self {
        self.types = types.into_iter().collect();
        self
    }

    pub fn with_fetch(mut self, fetch: FetchMode) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn with_cursor(mut self, cursor: Cursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    pub fn with_direction(mut self, direction: PageDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn including_trash(mut self) -> Self {
        self.include_trash = true;
        self
    }

    pub fn including_spam(mut self) -> Self {
        self.include_spam = true;
        self
    }

    /// Folders left out unless the query names a folder.
    pub fn excluded_folders(&self) -> Vec<FolderId> {
        let mut excluded = Vec::new();
        if !self.include_trash {
            excluded.push(folders::TRASH);
        }
        if !self.include_spam {
            excluded.push(folders::SPAM);
        }
        excluded
    }

    /// The types as stored: conversations are matched through their
    /// messages and chats.
    pub fn storage_types(&self) -> BTreeSet<ItemType> {
        self.types
            .iter()
            .flat_map(|t| t.storage_types().iter().copied())
            .collect()
    }
}

/// Plans and runs queries against one pair of backends.
pub struct Searcher<'a> {
    relational: &'a dyn RelationalBackend,
    text: &'a dyn TextIndex,
    oracle: Option<&'a dyn SelectivityOracle>,
    planner: PlannerConfig,
    optimizer: OptimizerConfig,
}

impl<'a> Searcher<'a> {
    pub fn new(relational: &'a dyn RelationalBackend, text: &'a dyn TextIndex) -> Self {
        Self {
            relational,
            text,
            oracle: None,
            planner: PlannerConfig::default(),
            optimizer: OptimizerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: &Config) -> Self {
        self.planner = config.planner.clone();
        self.optimizer = config.optimizer.clone();
        self
    }

    /// Use `oracle` for planner statistics instead of asking the backends.
    pub fn with_oracle(mut self, oracle: &'a dyn SelectivityOracle) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Compile, default trash/spam handling, and optimize.
    pub fn plan(&self, clause: &Clause, params: &SearchParams) -> Operation {
        let op = compile(clause).ensure_spam_trash_setting(&params.excluded_folders());
        op.optimize(&self.optimizer)
    }

    /// Render the optimized operation tree.
    pub fn explain(&self, clause: &Clause, params: &SearchParams) -> String {
        self.plan(clause, params).to_string()
    }

    pub fn search(&self, clause: &Clause, params: SearchParams) -> Result<SearchResults<'a>> {
        let op = self.plan(clause, &params);
        self.run(op, params)
    }

    /// Execute an already planned operation tree.
    pub fn run(&self, op: Operation, params: SearchParams) -> Result<SearchResults<'a>> {
        let oracle: Box<dyn SelectivityOracle + 'a> = match self.oracle {
            Some(oracle) => Box::new(oracle),
            None => Box::new(BackendStatistics::new(self.relational, self.text)),
        };
        let resolver = match params.cursor {
            Some(ref cursor) if !params.types.contains(&ItemType::Conversation) => {
                Some(CursorResolver::new(cursor, params.sort)?)
            }
            _ => None,
        };
        debug!(tree = %op, sort = %params.sort, "Running search");
        let mut results = SearchResults {
            env: SearchEnv {
                relational: self.relational,
                text: self.text,
                oracle,
                params,
                planner: self.planner.clone(),
            },
            root: op,
            lookahead: Lookahead::default(),
            resolver,
            backward: None,
            closed: false,
        };
        let ctx = results.env.ctx();
        results.root.begin(&ctx)?;
        results.position()?;
        Ok(results)
    }
}

struct SearchEnv<'a> {
    relational: &'a dyn RelationalBackend,
    text: &'a dyn TextIndex,
    oracle: Box<dyn SelectivityOracle + 'a>,
    params: SearchParams,
    planner: PlannerConfig,
}

impl SearchEnv<'_> {
    fn ctx(&self) -> QueryContext<'_> {
        QueryContext {
            relational: self.relational,
            text: self.text,
            oracle: &*self.oracle,
            params: &self.params,
            planner: &self.planner,
            chunk_size: self
                .params
                .chunk_size
                .unwrap_or(self.planner.initial_chunk_size),
        }
    }
}

/// A streaming handle over the hits of one search.
pub struct SearchResults<'a> {
    env: SearchEnv<'a>,
    root: Operation,
    lookahead: Lookahead,
    resolver: Option<CursorResolver>,
    /// Reversed page when paging backwards from the cursor.
    backward: Option<VecDeque<Hit>>,
    closed: bool,
}

impl SearchResults<'_> {
    fn position(&mut self) -> Result<()> {
        let Some(ref resolver) = self.resolver else {
            return Ok(());
        };
        let ctx = self.env.ctx();
        match self.env.params.direction {
            PageDirection::Forward => {
                resolver.skip_forward(&mut self.root, &ctx)?;
            }
            PageDirection::Backward => {
                self.backward = Some(resolver.collect_backward(&mut self.root, &ctx)?);
            }
        }
        Ok(())
    }

    /// The next hit, without consuming it.
    pub fn peek(&mut self) -> Result<Option<Hit>> {
        if self.closed {
            return Err(SearchError::Closed);
        }
        if let Some(ref page) = self.backward {
            return Ok(page.front().cloned());
        }
        let ctx = self.env.ctx();
        let root = &mut self.root;
        let hit = self.lookahead.fill_with(|| root.next(&ctx))?;
        match (hit, &self.resolver) {
            (Some(hit), Some(resolver)) if resolver.reaches_end(hit) => Ok(None),
            (hit, _) => Ok(hit.cloned()),
        }
    }

    pub fn next(&mut self) -> Result<Option<Hit>> {
        if self.peek()?.is_none() {
            return Ok(None);
        }
        match self.backward {
            Some(ref mut page) => Ok(page.pop_front()),
            None => Ok(self.lookahead.take()),
        }
    }

    /// Start over from the first hit (after the cursor, if any).
    pub fn reset(&mut self) -> Result<()> {
        if self.closed {
            return Err(SearchError::Closed);
        }
        self.root.reset()?;
        self.lookahead = Lookahead::NotFetched;
        self.backward = None;
        self.position()
    }

    /// Discard up to `n` hits; returns how many were discarded.
    pub fn skip_to(&mut self, n: usize) -> Result<usize> {
        let mut skipped = 0;
        while skipped < n && self.next()?.is_some() {
            skipped += 1;
        }
        Ok(skipped)
    }

    /// Up to `limit` hits.
    pub fn take_hits(&mut self, limit: usize) -> Result<Vec<Hit>> {
        let mut hits = Vec::with_capacity(limit.min(1024));
        while hits.len() < limit {
            match self.next()? {
                Some(hit) => hits.push(hit),
                None => break,
            }
        }
        Ok(hits)
    }

    /// Release backend resources. Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.root.close();
        self.closed = true;
        debug!("Search results closed");
    }

    pub fn sort_order(&self) -> SortOrder {
        self.env.params.sort
    }

    /// Number of hits before the cursor, when the cursor asked for it.
    pub fn cursor_offset(&self) -> Option<usize> {
        self.root.cursor_offset()
    }

    pub fn result_info(&self) -> Vec<ResultInfo> {
        self.root.result_info()
    }

    /// The operation tree being executed.
    pub fn operation(&self) -> &Operation {
        &self.root
    }
}

impl Drop for SearchResults<'_> {
    fn drop(&mut self) {
        self.close();
    }
}
