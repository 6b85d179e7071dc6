use serde::{Deserialize, Serialize};

use crate::transcript::{RoleId, Speaker, Transcript};

pub const DEFAULT_MAX_CYCLES: usize = 5;

pub const DEFAULT_CHANGE_MARKERS: &[&str] = &[
    "change", "revise", "revision", "fix", "modify", "update", "adjust", "rework", "redo",
    "reject",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationMode {
    /// Stop when a full cycle ends with a reviewer who asks for nothing.
    #[default]
    Review,
    /// Stop as soon as the last roster role has spoken once.
    SinglePass,
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// The reviewer closed a cycle without requesting changes.
    Approved,
    /// Single-pass mode: every role has had its turn.
    SinglePass,
    /// The message ceiling was reached.
    HardCap,
}

#[derive(Debug, Clone)]
pub struct TerminationPolicy {
    pub mode: TerminationMode,
    pub max_cycles: usize,
    pub change_markers: Vec<String>,
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        Self {
            mode: TerminationMode::Review,
            max_cycles: DEFAULT_MAX_CYCLES,
            change_markers: DEFAULT_CHANGE_MARKERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl TerminationPolicy {
    /// Total message ceiling for a roster of `roster_len` agents.
    pub fn message_cap(&self, roster_len: usize) -> usize {
        self.max_cycles.max(1) * roster_len.max(1)
    }

    pub fn should_terminate(&self, roles: &[RoleId], transcript: &Transcript) -> bool {
        self.evaluate(roles, transcript).is_some()
    }

    pub fn evaluate(&self, roles: &[RoleId], transcript: &Transcript) -> Option<StopReason> {
        let len = transcript.len();
        if len < RoleId::CYCLE.len() {
            return None;
        }

        let early = match self.mode {
            TerminationMode::Review => self.reviewer_accepted(roles, transcript),
            TerminationMode::SinglePass => single_pass_done(roles, transcript),
        };
        if early.is_some() {
            return early;
        }

        // Unconditional: content checks above can only stop earlier.
        if len >= self.message_cap(roles.len()) {
            return Some(StopReason::HardCap);
        }
        None
    }

    fn reviewer_accepted(&self, roles: &[RoleId], transcript: &Transcript) -> Option<StopReason> {
        if !RoleId::CYCLE.iter().all(|r| roles.contains(r)) {
            return None;
        }
        let tail = transcript.tail(RoleId::CYCLE.len());
        let completed = tail
            .iter()
            .map(|m| m.speaker())
            .eq(RoleId::CYCLE.iter().map(|r| Speaker::Agent(*r)));
        if !completed {
            return None;
        }
        let feedback = tail.last()?.text();
        if self.requests_changes(feedback) {
            None
        } else {
            Some(StopReason::Approved)
        }
    }

    /// Whether `text` contains a word starting with one of the change markers.
    /// A marker right after a negation ("no changes", "nothing to fix") does
    /// not count.
    pub fn requests_changes(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !(c.is_alphanumeric() || is_apostrophe(c)))
            .map(|w| w.trim_matches(is_apostrophe))
            .filter(|w| !w.is_empty())
            .collect();
        words
            .iter()
            .enumerate()
            .any(|(i, word)| self.is_marker(word) && !negated(&words[..i]))
    }

    fn is_marker(&self, word: &str) -> bool {
        self.change_markers
            .iter()
            .any(|m| !m.is_empty() && word.starts_with(&m.to_lowercase()))
    }
}

const NEGATIONS: &[&str] = &["no", "not", "nothing", "without", "never", "none", "nor"];

fn is_apostrophe(c: char) -> bool {
    c == '\'' || c == '\u{2019}'
}

fn is_negation(word: &str) -> bool {
    NEGATIONS.contains(&word) || word.ends_with("n't") || word.ends_with("n\u{2019}t")
}

fn negated(before: &[&str]) -> bool {
    match before {
        [.., prev] if is_negation(prev) => true,
        [.., neg, "to"] => is_negation(neg),
        _ => false,
    }
}

fn single_pass_done(roles: &[RoleId], transcript: &Transcript) -> Option<StopReason> {
    let last_role = roles.last()?;
    let last = transcript.last()?;
    (transcript.len() >= roles.len() && last.speaker() == Speaker::Agent(*last_role))
        .then_some(StopReason::SinglePass)
}
