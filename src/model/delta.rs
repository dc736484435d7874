// Delta-merge algebra
//
// A delta is a field bitmask plus nullable slots; deltas coalesce with `merge`
// (associative) and apply to live entities with `apply`. `diff` produces the
// minimal delta between two snapshots.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{SimnetError, SimnetResult};
use crate::model::aircraft::{Aircraft, AircraftMeta, AircraftMotion, AircraftState};
use crate::model::controller::{Controller, ControllerMeta, ControllerState};

/// Bitmask naming the fields a delta carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateFields(pub u8);

impl UpdateFields {
    pub const NONE: UpdateFields = UpdateFields(0);
    pub const DELETE: UpdateFields = UpdateFields(1 << 0);
    pub const METADATA: UpdateFields = UpdateFields(1 << 1);
    pub const STATE: UpdateFields = UpdateFields(1 << 2);
    pub const MOVEMENT: UpdateFields = UpdateFields(1 << 3);

    #[inline]
    pub fn contains(&self, other: UpdateFields) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: UpdateFields) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn is_delete(&self) -> bool {
        self.contains(UpdateFields::DELETE)
    }
}

/// Sparse change record for one aircraft. Doubles as the `%` wire envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AircraftDelta {
    pub aircraft: Uuid,
    pub update: UpdateFields,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<AircraftMeta>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub state: Option<AircraftState>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub motion: Option<AircraftMotion>,
}

impl AircraftDelta {
    pub fn empty(aircraft: Uuid) -> Self {
        AircraftDelta {
            aircraft,
            update: UpdateFields::NONE,
            metadata: None,
            state: None,
            motion: None,
        }
    }

    /// A pure-delete delta: every value slot cleared.
    pub fn delete(aircraft: Uuid) -> Self {
        AircraftDelta {
            aircraft,
            update: UpdateFields::DELETE,
            metadata: None,
            state: None,
            motion: None,
        }
    }

    /// A full-state delta carrying every field of `ac` (used by snapshots).
    pub fn full(ac: &Aircraft) -> Self {
        let mut update = UpdateFields::NONE;
        update.insert(UpdateFields::METADATA);
        update.insert(UpdateFields::STATE);
        update.insert(UpdateFields::MOVEMENT);
        AircraftDelta {
            aircraft: ac.id,
            update,
            metadata: Some(ac.metadata.clone()),
            state: Some(ac.state),
            motion: Some(ac.motion),
        }
    }

    /// Left-to-right merge. A delete on the right wipes to a pure delete; a
    /// delete on the left is superseded by the right (identifier preserved,
    /// every field bit raised so earlier deltas cannot bleed through);
    /// otherwise the right's present fields overwrite the left's.
    pub fn merge(&self, rhs: &AircraftDelta) -> AircraftDelta {
        if rhs.update.is_delete() {
            return AircraftDelta::delete(self.aircraft);
        }
        if self.update.is_delete() {
            let mut out = rhs.clone();
            out.aircraft = self.aircraft;
            out.update.insert(UpdateFields::METADATA);
            out.update.insert(UpdateFields::STATE);
            out.update.insert(UpdateFields::MOVEMENT);
            return out;
        }

        let mut out = self.clone();
        out.update.insert(rhs.update);
        if rhs.update.contains(UpdateFields::METADATA) {
            out.metadata = rhs.metadata.clone();
        }
        if rhs.update.contains(UpdateFields::STATE) {
            out.state = rhs.state;
        }
        if rhs.update.contains(UpdateFields::MOVEMENT) {
            out.motion = rhs.motion;
        }
        out
    }

    /// Apply the present fields to a live entity. A delete cannot be applied
    /// to an entity; the store removes the entity instead.
    pub fn apply(&self, entity: &Aircraft) -> SimnetResult<Aircraft> {
        if self.update.is_delete() {
            return Err(SimnetError::InvalidPluginOp(format!(
                "delete delta applied to live aircraft {}",
                entity.id
            )));
        }

        let mut out = entity.clone();
        if self.update.contains(UpdateFields::METADATA) {
            if let Some(metadata) = &self.metadata {
                out.metadata = metadata.clone();
            }
        }
        if self.update.contains(UpdateFields::STATE) {
            if let Some(state) = self.state {
                out.state = state;
            }
        }
        if self.update.contains(UpdateFields::MOVEMENT) {
            if let Some(motion) = self.motion {
                out.motion = motion;
            }
        }
        Ok(out)
    }

    /// The delta containing exactly the fields on which `from` and `to`
    /// differ.
    pub fn diff(from: &Aircraft, to: &Aircraft) -> AircraftDelta {
        let mut delta = AircraftDelta::empty(from.id);
        if from.metadata != to.metadata {
            delta.update.insert(UpdateFields::METADATA);
            delta.metadata = Some(to.metadata.clone());
        }
        if from.state != to.state {
            delta.update.insert(UpdateFields::STATE);
            delta.state = Some(to.state);
        }
        if from.motion != to.motion {
            delta.update.insert(UpdateFields::MOVEMENT);
            delta.motion = Some(to.motion);
        }
        delta
    }
}

/// Sparse change record for one controller. Doubles as the `@` wire envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerDelta {
    pub controller: Uuid,
    pub update: UpdateFields,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<ControllerMeta>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub state: Option<ControllerState>,
}

impl ControllerDelta {
    pub fn empty(controller: Uuid) -> Self {
        ControllerDelta {
            controller,
            update: UpdateFields::NONE,
            metadata: None,
            state: None,
        }
    }

    pub fn delete(controller: Uuid) -> Self {
        ControllerDelta {
            controller,
            update: UpdateFields::DELETE,
            metadata: None,
            state: None,
        }
    }

    pub fn full(ctrl: &Controller) -> Self {
        let mut update = UpdateFields::NONE;
        update.insert(UpdateFields::METADATA);
        update.insert(UpdateFields::STATE);
        ControllerDelta {
            controller: ctrl.id,
            update,
            metadata: Some(ctrl.metadata.clone()),
            state: Some(ctrl.state.clone()),
        }
    }

    pub fn merge(&self, rhs: &ControllerDelta) -> ControllerDelta {
        if rhs.update.is_delete() {
            return ControllerDelta::delete(self.controller);
        }
        if self.update.is_delete() {
            let mut out = rhs.clone();
            out.controller = self.controller;
            out.update.insert(UpdateFields::METADATA);
            out.update.insert(UpdateFields::STATE);
            return out;
        }

        let mut out = self.clone();
        out.update.insert(rhs.update);
        if rhs.update.contains(UpdateFields::METADATA) {
            out.metadata = rhs.metadata.clone();
        }
        if rhs.update.contains(UpdateFields::STATE) {
            out.state = rhs.state.clone();
        }
        out
    }

    pub fn apply(&self, entity: &Controller) -> SimnetResult<Controller> {
        if self.update.is_delete() {
            return Err(SimnetError::InvalidPluginOp(format!(
                "delete delta applied to live controller {}",
                entity.id
            )));
        }

        let mut out = entity.clone();
        if self.update.contains(UpdateFields::METADATA) {
            if let Some(metadata) = &self.metadata {
                out.metadata = metadata.clone();
            }
        }
        if self.update.contains(UpdateFields::STATE) {
            if let Some(state) = &self.state {
                out.state = state.clone();
            }
        }
        Ok(out)
    }
}
