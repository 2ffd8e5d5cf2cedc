//! Archetype storage.
//!
//! An [`Archetype`] holds every entity whose component set is exactly its
//! sorted list of [`ComponentTypeId`]s. Data is laid out column-wise: one
//! `Vec` of boxed values per component type, parallel to the entity list, so
//! row `i` of every column belongs to `entities[i]`.
//!
//! Values are stored as `Box<dyn Any + Send + Sync>`. This keeps the module
//! free of `unsafe`; typed access downcasts. Queries that need several
//! columns mutably at once temporarily take columns out of the archetype
//! (see [`take_column`](Archetype::take_column)) and put them back afterwards.

use std::any::Any;

use crate::component::{BoxedComponent, ComponentTypeId};
use crate::entity::Entity;

/// Index into `World::archetypes`. Archetypes are never removed, so IDs are
/// stable and creation order is iteration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchetypeId(pub(crate) u32);

impl ArchetypeId {
    /// Position in `World::archetypes`.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Storage for every entity with one exact component set.
///
/// One column per component type, one row per entity; row `i` of every
/// column belongs to `entities[i]`.
#[derive(Debug)]
pub struct Archetype {
    id: ArchetypeId,
    component_types: Vec<ComponentTypeId>,
    columns: Vec<Vec<BoxedComponent>>,
    entities: Vec<Entity>,
}

impl Archetype {
    /// `component_types` must be sorted and free of duplicates.
    pub(crate) fn new(id: ArchetypeId, component_types: Vec<ComponentTypeId>) -> Self {
        debug_assert!(component_types.windows(2).all(|w| w[0] < w[1]));
        let columns = component_types.iter().map(|_| Vec::new()).collect();
        Self {
            id,
            component_types,
            columns,
            entities: Vec::new(),
        }
    }

    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    /// Sorted component types stored here.
    pub fn component_types(&self) -> &[ComponentTypeId] {
        &self.component_types
    }

    /// Entities in row order.
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn has_component(&self, id: ComponentTypeId) -> bool {
        self.column_index(id).is_some()
    }

    fn column_index(&self, id: ComponentTypeId) -> Option<usize> {
        self.component_types.binary_search(&id).ok()
    }

    // -- rows -----------------------------------------------------------------

    /// Append a row. `components` must cover exactly this archetype's types,
    /// in sorted order.
    pub(crate) fn push(
        &mut self,
        entity: Entity,
        components: Vec<(ComponentTypeId, BoxedComponent)>,
    ) -> usize {
        debug_assert_eq!(components.len(), self.component_types.len());
        for (column, (id, value)) in self.columns.iter_mut().zip(components) {
            debug_assert!(self.component_types.contains(&id));
            column.push(value);
        }
        self.entities.push(entity);
        self.entities.len() - 1
    }

    /// Swap-remove a row, returning its components and the entity that was
    /// moved into `row` (if any) so the caller can fix up its location.
    pub(crate) fn swap_remove(
        &mut self,
        row: usize,
    ) -> (Vec<(ComponentTypeId, BoxedComponent)>, Option<Entity>) {
        let components = self
            .component_types
            .iter()
            .zip(self.columns.iter_mut())
            .map(|(&id, column)| (id, column.swap_remove(row)))
            .collect();
        self.entities.swap_remove(row);
        let moved = self.entities.get(row).copied();
        (components, moved)
    }

    // -- component access -----------------------------------------------------

    pub fn get_any(&self, row: usize, id: ComponentTypeId) -> Option<&dyn Any> {
        let col = self.column_index(id)?;
        self.columns[col].get(row).map(|b| &**b as &dyn Any)
    }

    /// Typed value at `row` in the column for `id`.
    pub fn get<T: 'static>(&self, row: usize, id: ComponentTypeId) -> Option<&T> {
        let col = self.column_index(id)?;
        self.columns[col].get(row)?.downcast_ref::<T>()
    }

    pub(crate) fn get_mut<T: 'static>(&mut self, row: usize, id: ComponentTypeId) -> Option<&mut T> {
        let col = self.column_index(id)?;
        self.columns[col].get_mut(row)?.downcast_mut::<T>()
    }

    /// Overwrite a stored value, returning the old one.
    pub(crate) fn replace(
        &mut self,
        row: usize,
        id: ComponentTypeId,
        value: BoxedComponent,
    ) -> Option<BoxedComponent> {
        let col = self.column_index(id)?;
        let slot = self.columns[col].get_mut(row)?;
        Some(std::mem::replace(slot, value))
    }

    /// Every `(type, value)` pair of one row, in type order.
    pub fn row(&self, row: usize) -> impl Iterator<Item = (ComponentTypeId, &dyn Any)> + '_ {
        self.component_types
            .iter()
            .zip(self.columns.iter())
            .filter_map(move |(&id, column)| column.get(row).map(|b| (id, &**b as &dyn Any)))
    }

    // -- column extraction ----------------------------------------------------

    /// Move a whole column out, leaving an empty one behind. Must be paired
    /// with [`restore_column`](Self::restore_column) before the archetype is
    /// used again.
    pub(crate) fn take_column(&mut self, id: ComponentTypeId) -> Vec<BoxedComponent> {
        match self.column_index(id) {
            Some(col) => std::mem::take(&mut self.columns[col]),
            None => Vec::new(),
        }
    }

    pub(crate) fn restore_column(&mut self, id: ComponentTypeId, values: Vec<BoxedComponent>) {
        if let Some(col) = self.column_index(id) {
            self.columns[col] = values;
        }
    }

    /// Read-only view of a column, for shared queries.
    pub(crate) fn column(&self, id: ComponentTypeId) -> Option<&[BoxedComponent]> {
        self.column_index(id).map(|col| self.columns[col].as_slice())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
