// This module provides arena-based session management for one run of the decoration pass
// using the bumpalo crate. DecorateSession owns a reference to the arena that holds
// per-function scratch data (the collected call lists handed from the call collector to
// the call-site instrumenter) and tracks pass statistics behind a RefCell so that every
// stage can record progress through a shared reference. SessionStats counts functions
// scanned, target definitions found, symbols captured for the address table, snapshot
// size, calls scanned, calls decorated and landing sites created, and renders a summary
// through Display that the pass logs once decoration is complete.

//! Arena-based session management for a decoration run.

use bumpalo::Bump;
use std::cell::RefCell;
use std::fmt;

/// Arena-based decoration session.
///
/// All per-function scratch allocated during a run shares the session
/// lifetime, so collected call lists can be handed between stages without
/// copying.
pub struct DecorateSession<'arena> {
    /// Arena allocator for scratch data.
    arena: &'arena Bump,

    /// Statistics for the current run.
    stats: RefCell<SessionStats>,
}

impl<'arena> DecorateSession<'arena> {
    /// Create a new session with the given arena.
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(SessionStats::default()),
        }
    }

    /// Get access to the arena allocator.
    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    pub fn record_functions_scanned(&self, scanned: usize, definitions: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.functions_scanned += scanned;
        stats.target_definitions += definitions;
    }

    pub fn record_snapshot(&self, symbols: usize, bytes: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.symbols_collected = symbols;
        stats.snapshot_bytes = bytes;
    }

    pub fn record_calls_scanned(&self, count: usize) {
        self.stats.borrow_mut().calls_scanned += count;
    }

    pub fn record_call_decorated(&self) {
        self.stats.borrow_mut().calls_decorated += 1;
    }

    pub fn record_landing_site(&self) {
        self.stats.borrow_mut().landing_sites += 1;
    }

    /// Get session statistics.
    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// Decoration statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionStats {
    /// Functions examined during target discovery.
    pub functions_scanned: usize,

    /// Target functions with a body.
    pub target_definitions: usize,

    /// Entries in the snapshot address table.
    pub symbols_collected: usize,

    /// Size of the embedded bitcode snapshot.
    pub snapshot_bytes: usize,

    /// Calls numbered inside target functions.
    pub calls_scanned: usize,

    /// Calls rewritten through the runtime resolver.
    pub calls_decorated: usize,

    /// Landing sites created.
    pub landing_sites: usize,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Decoration Session Statistics:")?;
        writeln!(f, "  Functions scanned: {}", self.functions_scanned)?;
        writeln!(f, "  Target definitions: {}", self.target_definitions)?;
        writeln!(f, "  Symbols collected: {}", self.symbols_collected)?;
        writeln!(f, "  Snapshot size: {} bytes", self.snapshot_bytes)?;
        writeln!(f, "  Landing sites: {}", self.landing_sites)?;
        writeln!(
            f,
            "  Calls decorated: {} of {}",
            self.calls_decorated, self.calls_scanned
        )?;
        Ok(())
    }
}
