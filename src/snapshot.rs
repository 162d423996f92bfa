// MIT License - Copyright (c) 2026 Peter Wright
// Device catalog and point-in-time snapshots

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::devices::input::{Input, InputInfo, InputStatusFlags, InputStatusRecord};
use crate::devices::section::{Section, SectionArmedState, SectionStatus};

/// Sections and inputs discovered after connecting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Catalog {
    pub sections: BTreeMap<u16, String>,
    pub inputs: BTreeMap<u16, InputInfo>,
}

impl Catalog {
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty() && self.inputs.is_empty()
    }

    pub fn input(&self, id: u16) -> Option<&InputInfo> {
        self.inputs.get(&id)
    }

    pub fn has_section(&self, id: u16) -> bool {
        self.sections.contains_key(&id)
    }

    /// Inputs that appear in snapshots.
    pub fn published_inputs(&self) -> impl Iterator<Item = &InputInfo> {
        self.inputs.values().filter(|info| info.category.is_published())
    }
}

/// A section whose armed state differs between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionChange {
    pub section_id: u16,
    pub old_state: Option<SectionArmedState>,
    pub new_state: SectionArmedState,
}

/// Immutable view of the panel at one poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub sections: Vec<Section>,
    pub inputs: Vec<Input>,
}

impl Snapshot {
    /// Combine decoded status records with the catalog.
    ///
    /// Sections outside a non-empty section catalog are dropped. Inputs are
    /// kept only if the catalog lists them as published and their status is
    /// not the disabled sentinel.
    pub fn assemble(
        catalog: &Catalog,
        sections: &[SectionStatus],
        inputs: &[InputStatusRecord],
        taken_at: DateTime<Utc>,
    ) -> Self {
        let mut sections: Vec<Section> = sections
            .iter()
            .filter(|s| catalog.sections.is_empty() || catalog.has_section(s.id))
            .map(|s| {
                let name = catalog
                    .sections
                    .get(&s.id)
                    .cloned()
                    .unwrap_or_else(|| Section::default_name(s.id));
                Section::new(s.id, name, s.state)
            })
            .collect();
        sections.sort_by_key(|s| s.id);
        sections.dedup_by_key(|s| s.id);

        let mut inputs: Vec<Input> = inputs
            .iter()
            .filter(|record| !InputStatusFlags::is_disabled(record.raw))
            .filter_map(|record| {
                let info = catalog.input(record.id)?;
                info.category
                    .is_published()
                    .then(|| Input::from_status(info, record.raw))
            })
            .collect();
        inputs.sort_by_key(|i| i.id);

        Self {
            taken_at,
            sections,
            inputs,
        }
    }

    pub fn section(&self, id: u16) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == id)
    }

    pub fn input(&self, id: u16) -> Option<&Input> {
        self.inputs.iter().find(|i| i.id == id)
    }

    /// Sections whose armed state differs from `previous`.
    pub fn section_changes(&self, previous: Option<&Snapshot>) -> Vec<SectionChange> {
        self.sections
            .iter()
            .filter_map(|section| {
                let old_state = previous
                    .and_then(|p| p.section(section.id))
                    .map(|s| s.armed_state);
                (old_state != Some(section.armed_state)).then_some(SectionChange {
                    section_id: section.id,
                    old_state,
                    new_state: section.armed_state,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::input::{InputCategory, InputState};

    fn info(id: u16, name: &str, sensor_type: u8) -> InputInfo {
        InputInfo {
            id,
            name: name.to_string(),
            sensor_type,
            reaction: 0,
            category: InputCategory::classify(name, sensor_type),
        }
    }

    fn catalog() -> Catalog {
        let mut catalog = Catalog::default();
        catalog.sections.insert(1, "Section 1".to_string());
        catalog.sections.insert(2, "Section 2".to_string());
        for entry in [
            info(1, "Voordeur", 1),
            info(2, "", 1),
            info(3, "VRIJE TEKST", 1),
            info(4, "Rookmelder", 7),
            info(5, "Achterdeur", 1),
        ] {
            catalog.inputs.insert(entry.id, entry);
        }
        catalog
    }

    fn statuses() -> Vec<InputStatusRecord> {
        vec![
            InputStatusRecord { id: 1, raw: 0x01 },
            InputStatusRecord { id: 2, raw: 0x00 },
            InputStatusRecord { id: 3, raw: 0x00 },
            InputStatusRecord { id: 4, raw: 0x00 },
            InputStatusRecord { id: 5, raw: 0x0F },
            InputStatusRecord { id: 6, raw: 0x01 },
        ]
    }

    #[test]
    fn test_assemble_filters_inputs() {
        let snapshot = Snapshot::assemble(&catalog(), &[], &statuses(), Utc::now());
        let ids: Vec<u16> = snapshot.inputs.iter().map(|i| i.id).collect();
        // 2 unprogrammed, 3 placeholder, 5 disabled, 6 not in catalog
        assert_eq!(ids, vec![1, 4]);
        assert_eq!(snapshot.input(1).unwrap().state, InputState::Open);
        assert_eq!(snapshot.input(4).unwrap().category, InputCategory::Diagnostic);
    }

    #[test]
    fn test_assemble_is_idempotent() {
        let catalog = catalog();
        let sections = [
            SectionStatus { id: 2, state: SectionArmedState::ArmedAway },
            SectionStatus { id: 1, state: SectionArmedState::Disarmed },
        ];
        let at = Utc::now();
        let a = Snapshot::assemble(&catalog, &sections, &statuses(), at);
        let b = Snapshot::assemble(&catalog, &sections, &statuses(), at);
        assert_eq!(a, b);
        assert_eq!(a.sections[0].id, 1);
        assert_eq!(a.sections[1].armed_state, SectionArmedState::ArmedAway);
    }

    #[test]
    fn test_sections_outside_catalog_dropped() {
        let sections = [
            SectionStatus { id: 1, state: SectionArmedState::Disarmed },
            SectionStatus { id: 7, state: SectionArmedState::Disarmed },
        ];
        let snapshot = Snapshot::assemble(&catalog(), &sections, &[], Utc::now());
        assert_eq!(snapshot.sections.len(), 1);

        let open = Snapshot::assemble(&Catalog::default(), &sections, &[], Utc::now());
        assert_eq!(open.sections.len(), 2);
        assert_eq!(open.sections[1].name, "Section 7");
    }

    #[test]
    fn test_section_changes() {
        let catalog = catalog();
        let first = Snapshot::assemble(
            &catalog,
            &[SectionStatus { id: 1, state: SectionArmedState::Disarmed }],
            &[],
            Utc::now(),
        );
        let changes = first.section_changes(None);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].old_state, None);

        assert!(first.section_changes(Some(&first)).is_empty());

        let second = Snapshot::assemble(
            &catalog,
            &[SectionStatus { id: 1, state: SectionArmedState::PendingExit }],
            &[],
            Utc::now(),
        );
        let changes = second.section_changes(Some(&first));
        assert_eq!(
            changes,
            vec![SectionChange {
                section_id: 1,
                old_state: Some(SectionArmedState::Disarmed),
                new_state: SectionArmedState::PendingExit,
            }]
        );
    }

    #[test]
    fn test_snapshot_serializes() {
        let snapshot = Snapshot::assemble(
            &catalog(),
            &[SectionStatus { id: 1, state: SectionArmedState::ArmedAway }],
            &statuses(),
            Utc::now(),
        );
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["sections"][0]["armed_state"]["state"], "armed_away");
        assert_eq!(json["inputs"][0]["state"], "open");
    }
}
