use std::collections::HashMap;

use crate::room::state::ConnId;

pub const NO_FILTER: &str = "none";

/// Cosmetic filter tags per member, last writer wins.
#[derive(Debug)]
pub struct FilterBook {
    local: String,
    remote: HashMap<ConnId, String>,
}

impl Default for FilterBook {
    fn default() -> Self {
        Self {
            local: NO_FILTER.to_string(),
            remote: HashMap::new(),
        }
    }
}

impl FilterBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local(&self) -> &str {
        &self.local
    }

    /// Returns the tag to broadcast if it differs from the current one.
    pub fn set_local(&mut self, tag: impl Into<String>) -> Option<String> {
        let tag = tag.into();
        if tag == self.local {
            return None;
        }
        self.local = tag.clone();
        Some(tag)
    }

    pub fn apply_remote(&mut self, member: ConnId, tag: String) {
        self.remote.insert(member, tag);
    }

    pub fn remove(&mut self, member: &ConnId) {
        self.remote.remove(member);
    }

    pub fn tag_for(&self, member: &ConnId) -> &str {
        self.remote.get(member).map_or(NO_FILTER, String::as_str)
    }

    /// A newcomer has not seen our filter yet; returns it unless it is the default.
    pub fn resync(&self) -> Option<String> {
        (self.local != NO_FILTER).then(|| self.local.clone())
    }
}
