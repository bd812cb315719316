//! Derived game state: character sheet, journal and NPC roster.
//!
//! These entities are kept in sync with the narrator's prose by reconciling
//! the structured blocks found in each response. Merging never loses facts
//! that a response simply did not mention.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::illustrate::AssetRef;

/// A stack of items in the character's inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub name: String,
    pub quantity: u32,
}

impl InventoryItem {
    /// Create an item; a zero quantity is raised to 1.
    pub fn new(name: impl Into<String>, quantity: u32) -> Self {
        Self {
            name: name.into(),
            quantity: quantity.max(1),
        }
    }
}

/// A partial character sheet carried by one response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusUpdate {
    /// Attributes to overwrite; keys not listed here are left alone.
    pub attributes: BTreeMap<String, String>,
    /// A complete inventory snapshot, when the response sent one.
    pub inventory: Option<Vec<InventoryItem>>,
    /// A complete list of active effects, when the response sent one.
    pub effects: Option<Vec<String>>,
}

impl StatusUpdate {
    /// Whether applying this update would change nothing.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.inventory.is_none() && self.effects.is_none()
    }
}

/// The player character's sheet.
///
/// Attribute names are chosen by the narrator at runtime, so they are kept
/// as an open string map rather than typed fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterStatus {
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub inventory: Vec<InventoryItem>,
    #[serde(default)]
    pub effects: Vec<String>,
}

impl CharacterStatus {
    /// Merge a partial update.
    ///
    /// Attributes are merged key by key. Inventory and effects are replaced
    /// wholesale when present, because the narrator always re-emits complete
    /// lists.
    pub fn apply_status(&mut self, update: StatusUpdate) {
        let StatusUpdate {
            attributes,
            inventory,
            effects,
        } = update;

        self.attributes.extend(attributes);
        if let Some(inventory) = inventory {
            self.inventory = inventory;
        }
        if let Some(effects) = effects {
            self.effects = effects;
        }
    }

    /// Look up an attribute value.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// First inventory stack with exactly this name.
    pub fn item(&self, name: &str) -> Option<&InventoryItem> {
        self.inventory.iter().find(|i| i.name == name)
    }

    /// Whether nothing is known about the character yet.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.inventory.is_empty() && self.effects.is_empty()
    }
}

/// A character introduced by the narrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpcIntro {
    pub name: String,
    pub description: String,
}

/// A character in the roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Npc {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub portrait: Option<AssetRef>,
    #[serde(default)]
    pub portrait_pending: bool,
}

impl From<NpcIntro> for Npc {
    fn from(intro: NpcIntro) -> Self {
        Self {
            name: intro.name,
            description: intro.description,
            portrait: None,
            portrait_pending: false,
        }
    }
}

/// Characters met so far, unique by exact name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NpcRoster {
    npcs: Vec<Npc>,
}

impl NpcRoster {
    /// Create an empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a roster from saved entries, keeping the first of any duplicate names.
    pub fn from_saved(npcs: Vec<Npc>) -> Self {
        let mut roster = Self::new();
        for npc in npcs {
            if !roster.contains(&npc.name) {
                roster.npcs.push(npc);
            }
        }
        roster
    }

    /// Append the introductions whose names are not yet known.
    ///
    /// Returns the names that were actually added, in order.
    pub fn add_npcs_if_new(&mut self, intros: impl IntoIterator<Item = NpcIntro>) -> Vec<String> {
        let mut added = Vec::new();
        for intro in intros {
            if self.contains(&intro.name) {
                tracing::debug!(name = %intro.name, "npc already known");
                continue;
            }
            added.push(intro.name.clone());
            self.npcs.push(intro.into());
        }
        added
    }

    /// Whether a character with exactly this name is known.
    pub fn contains(&self, name: &str) -> bool {
        self.npcs.iter().any(|n| n.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&Npc> {
        self.npcs.iter().find(|n| n.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Npc> {
        self.npcs.iter_mut().find(|n| n.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Npc> {
        self.npcs.iter()
    }

    pub fn len(&self) -> usize {
        self.npcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.npcs.is_empty()
    }

    /// Clear every in-flight portrait marker.
    pub(crate) fn clear_pending(&mut self) {
        for npc in &mut self.npcs {
            npc.portrait_pending = false;
        }
    }
}

/// Append-only log of short notes about the story so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Journal {
    entries: Vec<String>,
}

impl Journal {
    /// Create an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a note.
    pub fn append(&mut self, entry: impl Into<String>) {
        self.entries.push(entry.into());
    }

    /// Get all entries, oldest first.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(pairs: &[(&str, &str)]) -> StatusUpdate {
        StatusUpdate {
            attributes: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..StatusUpdate::default()
        }
    }

    fn intro(name: &str, description: &str) -> NpcIntro {
        NpcIntro {
            name: name.to_string(),
            description: description.to_string(),
        }
    }

    #[test]
    fn test_attributes_merge_field_by_field() {
        let mut status = CharacterStatus::default();
        status.apply_status(update(&[("Health", "10/10"), ("Gold", "5")]));
        status.apply_status(update(&[("Health", "7/10")]));

        assert_eq!(status.attribute("Health"), Some("7/10"));
        assert_eq!(status.attribute("Gold"), Some("5"));
    }

    #[test]
    fn test_reapplying_subset_keeps_unset_keys() {
        let mut status = CharacterStatus::default();
        let full = update(&[("Health", "10/10"), ("Mood", "calm"), ("Level", "2")]);
        status.apply_status(full.clone());
        let before = status.clone();

        status.apply_status(update(&[("Mood", "calm")]));
        assert_eq!(status, before);
    }

    #[test]
    fn test_inventory_replacement_is_total() {
        let mut status = CharacterStatus::default();
        status.inventory = vec![InventoryItem::new("Old Boot", 1), InventoryItem::new("Rope", 3)];

        let snapshot = vec![InventoryItem::new("Lantern", 1)];
        status.apply_status(StatusUpdate {
            inventory: Some(snapshot.clone()),
            ..StatusUpdate::default()
        });
        assert_eq!(status.inventory, snapshot);

        status.apply_status(StatusUpdate {
            inventory: Some(Vec::new()),
            ..StatusUpdate::default()
        });
        assert!(status.inventory.is_empty());
    }

    #[test]
    fn test_absent_lists_are_untouched() {
        let mut status = CharacterStatus {
            effects: vec!["Blessed".to_string()],
            inventory: vec![InventoryItem::new("Rope", 1)],
            ..CharacterStatus::default()
        };
        status.apply_status(update(&[("Health", "1")]));
        assert_eq!(status.effects, vec!["Blessed".to_string()]);
        assert_eq!(status.item("Rope").map(|i| i.quantity), Some(1));
    }

    #[test]
    fn test_inventory_duplicates_are_kept() {
        let mut status = CharacterStatus::default();
        status.apply_status(StatusUpdate {
            inventory: Some(vec![InventoryItem::new("Arrow", 10), InventoryItem::new("Arrow", 5)]),
            ..StatusUpdate::default()
        });
        assert_eq!(status.inventory.len(), 2);
        assert_eq!(status.item("Arrow").map(|i| i.quantity), Some(10));
        assert!(status.item("arrow").is_none());
    }

    #[test]
    fn test_zero_quantity_is_raised() {
        assert_eq!(InventoryItem::new("Pebble", 0).quantity, 1);
    }

    #[test]
    fn test_add_npcs_if_new_is_idempotent() {
        let mut roster = NpcRoster::new();
        let list = vec![intro("Old Man", "Gray beard"), intro("Vera", "Smith")];

        let added = roster.add_npcs_if_new(list.clone());
        assert_eq!(added, vec!["Old Man".to_string(), "Vera".to_string()]);

        let added = roster.add_npcs_if_new(list);
        assert!(added.is_empty());
        assert_eq!(roster.len(), 2);
    }

    #[test]
    fn test_redescribed_npc_keeps_first_description() {
        let mut roster = NpcRoster::new();
        roster.add_npcs_if_new([intro("Vera", "Smith")]);
        roster.add_npcs_if_new([intro("Vera", "Now a queen"), intro("vera", "Someone else")]);

        assert_eq!(roster.len(), 2);
        assert_eq!(roster.get("Vera").unwrap().description, "Smith");
        assert!(roster.contains("vera"));
    }

    #[test]
    fn test_duplicate_names_in_one_batch_added_once() {
        let mut roster = NpcRoster::new();
        let added = roster.add_npcs_if_new([intro("Ash", "Hooded"), intro("Ash", "Hooded again")]);
        assert_eq!(added.len(), 1);
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_roster_from_saved_drops_duplicates() {
        let roster = NpcRoster::from_saved(vec![
            Npc::from(intro("A", "first")),
            Npc::from(intro("A", "second")),
        ]);
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.get("A").unwrap().description, "first");
    }

    #[test]
    fn test_journal_is_append_only() {
        let mut journal = Journal::new();
        journal.append("Met Vera.");
        journal.append("Lost the map.");
        assert_eq!(journal.entries(), &["Met Vera.".to_string(), "Lost the map.".to_string()]);
    }
}
