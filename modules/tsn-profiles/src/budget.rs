//! Character budgets for evidence sent to the model.
//!
//! Characters stand in for tokens. Candidates are accepted in scan order while
//! they fit; the first one that would overflow closes the budget, so accepted
//! evidence is always a prefix of the candidate list.

/// Per-snippet caps, applied before the global ceiling.
pub const CALLSIGN_SNIPPET_CHARS: usize = 1200;
pub const NET_SNIPPET_CHARS: usize = 1000;
pub const NCS_SNIPPET_CHARS: usize = 900;

/// Transcript ids considered per callsign, and ids per text query.
pub const TRANSCRIPT_LOOKUP_LIMIT: i64 = 2000;
pub const TRANSCRIPT_CHUNK_SIZE: usize = 500;

/// Sessions and participants sampled per entity.
pub const NET_SESSION_LIMIT: i64 = 200;
pub const NCS_SESSION_LIMIT: i64 = 50;
pub const NET_PARTICIPANT_LIMIT: i64 = 50;

/// Lines embedded in a prompt.
pub const PROMPT_EVIDENCE_LINES: usize = 200;
pub const PROMPT_INSTANCE_LINES: usize = 20;

/// Evidence ceilings derived from the per-request character limit, leaving
/// room for the prompt framing and schema hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvidenceBudgets {
    pub callsign: usize,
    pub net: usize,
    pub ncs: usize,
}

impl EvidenceBudgets {
    pub fn from_max_chars(ai_max_chars: usize) -> Self {
        Self {
            callsign: ai_max_chars.saturating_sub(6000).max(2000),
            net: ai_max_chars.saturating_sub(8000).max(3000),
            ncs: ai_max_chars.saturating_sub(8000).max(2000),
        }
    }

    /// Share of the net ceiling given to each participant when a net has no
    /// structured sessions.
    pub fn participant_share(&self) -> usize {
        (self.net / 10).max(1000)
    }
}

/// Running total against a ceiling. Closed at the first rejected candidate.
#[derive(Debug, Clone)]
pub struct CharBudget {
    ceiling: usize,
    used: usize,
    closed: bool,
}

impl CharBudget {
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling,
            used: 0,
            closed: false,
        }
    }

    /// Reserve `len` characters. Returns false, and closes the budget, when
    /// the candidate does not fit.
    pub fn try_take(&mut self, len: usize) -> bool {
        if self.closed {
            return false;
        }
        if self.used + len > self.ceiling {
            self.closed = true;
            return false;
        }
        self.used += len;
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }
}

/// Greedy prefix of `items` whose summed lengths stay within `ceiling`.
pub fn take_prefix<T>(
    items: impl IntoIterator<Item = T>,
    ceiling: usize,
    len: impl Fn(&T) -> usize,
) -> Vec<T> {
    let mut budget = CharBudget::new(ceiling);
    items
        .into_iter()
        .take_while(|item| budget.try_take(len(item)))
        .collect()
}
