//! Per-room registry of networked components

pub mod components;

use std::collections::HashMap;

use crate::codec::{BytesReader, BytesWriter, CodecError};
use crate::protocol::game_data::SpawnComponent;
use crate::protocol::settings::GameMap;

pub use components::{
    ComponentBody, ComponentClass, NetComponent, SpawnType, UnknownComponent, ROOM_OWNER,
};

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("no component with net id {0}")]
    NotFound(u32),

    #[error("spawn type {0} has no prefab and the unknown-object policy rejects it")]
    UnknownSpawnType(u32),

    #[error("spawn listed {got} component(s), prefab expects {expected}")]
    ComponentCountMismatch { expected: usize, got: usize },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// All networked components of one room, indexed by net id.
#[derive(Default)]
pub struct ObjectGraph {
    components: HashMap<u32, NetComponent>,
    by_owner: HashMap<i32, Vec<u32>>,
    next_net_id: u32,
}

impl ObjectGraph {
    pub fn new() -> Self {
        Self { components: HashMap::new(), by_owner: HashMap::new(), next_net_id: 1 }
    }

    /// Monotonic allocator. Never reuses an id within a room lifetime.
    pub fn allocate_net_id(&mut self) -> u32 {
        let id = self.next_net_id;
        self.next_net_id += 1;
        id
    }

    /// Track the maximum net id seen in remote spawns so local
    /// allocations never collide with them.
    pub fn observe_net_id(&mut self, net_id: u32) {
        if net_id >= self.next_net_id {
            self.next_net_id = net_id + 1;
        }
    }

    pub fn next_net_id(&self) -> u32 {
        self.next_net_id
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn get(&self, net_id: u32) -> Option<&NetComponent> {
        self.components.get(&net_id)
    }

    pub fn get_mut(&mut self, net_id: u32) -> Option<&mut NetComponent> {
        self.components.get_mut(&net_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetComponent> {
        self.components.values()
    }

    fn insert(&mut self, component: NetComponent) {
        self.by_owner.entry(component.owner_id).or_default().push(component.net_id);
        self.components.insert(component.net_id, component);
    }

    /// Spawn a prefab locally. Returns the new net ids in prefab order.
    pub fn spawn(&mut self, spawn_type: SpawnType, owner_id: i32, flags: u8) -> Vec<u32> {
        let map: Option<GameMap> = spawn_type.ship_map();
        let mut ids = Vec::new();
        for template in spawn_type.prefab() {
            let net_id = self.allocate_net_id();
            ids.push(net_id);
            self.insert(NetComponent {
                net_id,
                owner_id,
                spawn_type: spawn_type.to_wire(),
                flags,
                dirty: 0,
                body: ComponentBody::from_template(*template, map),
            });
        }
        ids
    }

    /// Apply a spawn that arrived from a client. Component payloads are
    /// deserialized with the spawn layout; net ids are taken from the
    /// message and recorded against the allocator.
    pub fn apply_remote_spawn(
        &mut self,
        spawn_type: SpawnType,
        owner_id: i32,
        flags: u8,
        spawn_components: &[SpawnComponent],
    ) -> Result<Vec<u32>, GraphError> {
        let prefab = spawn_type.prefab();
        if prefab.len() != spawn_components.len() {
            return Err(GraphError::ComponentCountMismatch {
                expected: prefab.len(),
                got: spawn_components.len(),
            });
        }

        let map = spawn_type.ship_map();
        let mut ids = Vec::new();
        for (template, wire) in prefab.iter().zip(spawn_components) {
            self.observe_net_id(wire.net_id);
            let mut component = NetComponent {
                net_id: wire.net_id,
                owner_id,
                spawn_type: spawn_type.to_wire(),
                flags,
                dirty: 0,
                body: ComponentBody::from_template(*template, map),
            };
            let mut reader = BytesReader::new(&wire.data);
            component.deserialize(&mut reader, true)?;
            ids.push(wire.net_id);
            self.insert(component);
        }
        Ok(ids)
    }

    /// Materialize an unknown spawn type as opaque components.
    pub fn apply_unknown_spawn(
        &mut self,
        spawn_type: u32,
        owner_id: i32,
        flags: u8,
        spawn_components: &[SpawnComponent],
    ) -> Vec<u32> {
        let mut ids = Vec::new();
        for wire in spawn_components {
            self.observe_net_id(wire.net_id);
            self.insert(NetComponent {
                net_id: wire.net_id,
                owner_id,
                spawn_type,
                flags,
                dirty: 0,
                body: ComponentBody::Unknown(UnknownComponent {
                    spawn_type,
                    payload: wire.data.clone(),
                }),
            });
            ids.push(wire.net_id);
        }
        ids
    }

    /// Remove a component from every index.
    pub fn despawn(&mut self, net_id: u32) -> Option<NetComponent> {
        let component = self.components.remove(&net_id)?;
        if let Some(owned) = self.by_owner.get_mut(&component.owner_id) {
            owned.retain(|id| *id != net_id);
            if owned.is_empty() {
                self.by_owner.remove(&component.owner_id);
            }
        }
        Some(component)
    }

    pub fn owned_by(&self, owner_id: i32) -> Vec<u32> {
        self.by_owner.get(&owner_id).cloned().unwrap_or_default()
    }

    /// Remove everything an owner holds; returns the despawned ids.
    pub fn despawn_owned(&mut self, owner_id: i32) -> Vec<u32> {
        let ids = self.owned_by(owner_id);
        for net_id in &ids {
            self.despawn(*net_id);
        }
        ids
    }

    /// Find an owner's component of a given class.
    pub fn find_owned(&self, owner_id: i32, class: ComponentClass) -> Option<u32> {
        self.by_owner.get(&owner_id)?.iter().copied().find(|net_id| {
            self.components.get(net_id).map(|c| c.class()) == Some(class)
        })
    }

    /// Find the first component of a class regardless of owner.
    pub fn find_class(&self, class: ComponentClass) -> Option<u32> {
        self.components
            .values()
            .find(|c| c.class() == class)
            .map(|c| c.net_id)
    }

    /// Apply a data update to a component.
    pub fn deserialize_into(&mut self, net_id: u32, bytes: &[u8]) -> Result<(), GraphError> {
        let component = self.components.get_mut(&net_id).ok_or(GraphError::NotFound(net_id))?;
        let mut reader = BytesReader::new(bytes);
        component.deserialize(&mut reader, false)?;
        Ok(())
    }

    /// Net ids whose dirty mask is non-zero.
    pub fn dirty_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .components
            .values()
            .filter(|c| c.dirty != 0)
            .map(|c| c.net_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Serialize a component's current state with the spawn layout,
    /// used when replaying the graph to a late joiner.
    pub fn spawn_payload(&self, net_id: u32) -> Option<SpawnComponent> {
        let component = self.components.get(&net_id)?;
        let mut writer = BytesWriter::new();
        component.serialize(&mut writer, true);
        Some(SpawnComponent { net_id, data: writer.into_bytes() })
    }
}
