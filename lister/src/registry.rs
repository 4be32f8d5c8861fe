//! Which listers list or hold each directory.

use std::collections::HashMap;

use indexmap::IndexMap;
use url::Url;

use crate::lister::ListerId;

/// A lister's relation to one directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListerStatus {
    /// A job or a pending cache replay is feeding the lister.
    Listing,

    /// The lister shows the directory; nothing is feeding it.
    Holding,
}

/// Listers of one directory, in registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryData {
    listers: IndexMap<ListerId, ListerStatus>,
}

impl DirectoryData {
    pub fn status(&self, id: ListerId) -> Option<ListerStatus> {
        self.listers.get(&id).copied()
    }

    /// Register `id` as listing. Registering a lister twice is a bug.
    pub fn add_listing(&mut self, id: ListerId) {
        let previous = self.listers.insert(id, ListerStatus::Listing);
        assert!(
            previous.is_none(),
            "{id} registered twice ({previous:?} and Listing)"
        );
    }

    /// Transition a registered lister. Returns false when `id` is unknown.
    pub fn set_status(&mut self, id: ListerId, status: ListerStatus) -> bool {
        match self.listers.get_mut(&id) {
            Some(current) => {
                *current = status;
                true
            }
            None => false,
        }
    }

    /// Register or transition `id`.
    pub fn set(&mut self, id: ListerId, status: ListerStatus) {
        self.listers.insert(id, status);
    }

    pub fn remove(&mut self, id: ListerId) -> Option<ListerStatus> {
        self.listers.shift_remove(&id)
    }

    fn with_status(&self, status: ListerStatus) -> Vec<ListerId> {
        self.listers
            .iter()
            .filter(|(_, s)| **s == status)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Snapshot of the listing listers.
    pub fn listing(&self) -> Vec<ListerId> {
        self.with_status(ListerStatus::Listing)
    }

    /// Snapshot of the holding listers.
    pub fn holding(&self) -> Vec<ListerId> {
        self.with_status(ListerStatus::Holding)
    }

    /// Snapshot of all listers.
    pub fn all(&self) -> Vec<ListerId> {
        self.listers.keys().copied().collect()
    }

    pub fn has_listing(&self) -> bool {
        self.listers.values().any(|s| *s == ListerStatus::Listing)
    }

    pub fn is_empty(&self) -> bool {
        self.listers.is_empty()
    }

    /// Add every lister of `other`. Statuses in `self` win on conflicts.
    pub fn absorb(&mut self, other: DirectoryData) {
        for (id, status) in other.listers {
            self.listers.entry(id).or_insert(status);
        }
    }
}

/// Per-URL lister table.
#[derive(Debug, Default)]
pub struct ListerRegistry {
    dirs: HashMap<Url, DirectoryData>,
}

impl ListerRegistry {
    pub fn get(&self, url: &Url) -> Option<&DirectoryData> {
        self.dirs.get(url)
    }

    pub fn get_mut(&mut self, url: &Url) -> Option<&mut DirectoryData> {
        self.dirs.get_mut(url)
    }

    /// The data for `url`, created empty if needed.
    pub fn entry(&mut self, url: &Url) -> &mut DirectoryData {
        self.dirs.entry(url.clone()).or_default()
    }

    pub fn remove(&mut self, url: &Url) -> Option<DirectoryData> {
        self.dirs.remove(url)
    }

    /// Status of `id` on `url`.
    pub fn status(&self, url: &Url, id: ListerId) -> Option<ListerStatus> {
        self.dirs.get(url).and_then(|d| d.status(id))
    }

    pub fn listing(&self, url: &Url) -> Vec<ListerId> {
        self.dirs.get(url).map(DirectoryData::listing).unwrap_or_default()
    }

    pub fn holding(&self, url: &Url) -> Vec<ListerId> {
        self.dirs.get(url).map(DirectoryData::holding).unwrap_or_default()
    }

    pub fn all(&self, url: &Url) -> Vec<ListerId> {
        self.dirs.get(url).map(DirectoryData::all).unwrap_or_default()
    }

    /// Drop entries nobody is registered in.
    pub fn remove_if_empty(&mut self, url: &Url) {
        if self.dirs.get(url).is_some_and(DirectoryData::is_empty) {
            self.dirs.remove(url);
        }
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_transitions_keep_one_status() {
        let mut data = DirectoryData::default();
        data.add_listing(ListerId(1));
        data.add_listing(ListerId(2));
        assert!(data.set_status(ListerId(1), ListerStatus::Holding));

        assert_eq!(data.listing(), vec![ListerId(2)]);
        assert_eq!(data.holding(), vec![ListerId(1)]);
        assert_eq!(data.all(), vec![ListerId(1), ListerId(2)]);
        assert!(!data.set_status(ListerId(9), ListerStatus::Holding));
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn test_double_registration_panics() {
        let mut data = DirectoryData::default();
        data.add_listing(ListerId(1));
        data.set_status(ListerId(1), ListerStatus::Holding);
        data.add_listing(ListerId(1));
    }

    #[test]
    fn test_absorb_keeps_existing_status() {
        let mut a = DirectoryData::default();
        a.set(ListerId(1), ListerStatus::Holding);
        let mut b = DirectoryData::default();
        b.set(ListerId(1), ListerStatus::Listing);
        b.set(ListerId(2), ListerStatus::Listing);

        a.absorb(b);
        assert_eq!(a.status(ListerId(1)), Some(ListerStatus::Holding));
        assert_eq!(a.status(ListerId(2)), Some(ListerStatus::Listing));
    }

    #[test]
    fn test_registry_prunes_empty() {
        let url = Url::parse("file:///d").unwrap();
        let mut registry = ListerRegistry::default();
        registry.entry(&url).add_listing(ListerId(1));
        registry.get_mut(&url).unwrap().remove(ListerId(1));
        assert_eq!(registry.len(), 1);
        registry.remove_if_empty(&url);
        assert!(registry.is_empty());
    }
}
