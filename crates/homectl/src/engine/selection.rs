use std::collections::BTreeSet;
use std::collections::HashSet;

/// Ids of displayed devices marked for a batch.
///
/// Only ids present in the displayed list can enter the set, and
/// [`SelectionSet::retain_visible`] drops every id that stops being displayed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SelectionSet {
    ids: BTreeSet<String>,
}

impl SelectionSet {
    /// Mark `id`, provided it is displayed. Returns whether it was accepted.
    pub fn select(&mut self, id: &str, visible: &[String]) -> bool {
        if !visible.iter().any(|v| v == id) {
            return false;
        }
        self.ids.insert(id.to_string());
        true
    }

    pub fn deselect(&mut self, id: &str) -> bool {
        self.ids.remove(id)
    }

    /// Replace the selection with every displayed id.
    pub fn select_all(&mut self, visible: &[String]) {
        self.ids = visible.iter().cloned().collect();
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Intersect with the displayed ids. Never adds anything.
    pub fn retain_visible(&mut self, visible: &[String]) {
        let visible: HashSet<&str> = visible.iter().map(String::as_str).collect();
        self.ids.retain(|id| visible.contains(id.as_str()));
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.ids.iter()
    }
}
