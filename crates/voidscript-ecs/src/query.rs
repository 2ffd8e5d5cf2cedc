//! Queries over entities by component set.
//!
//! Building a query and running it are separate steps. A [`QueryFilter`] is
//! plain data (which types are required, alternatives, exclusions, whether
//! the set must match exactly) and [`World::execute_query`] turns it into the
//! list of matching archetypes. The typed front-ends [`Query`] and
//! [`QueryMut`] build a filter from a tuple of `&T` / `&mut T` and bind those
//! components, in listed order, to each visited entity.
//!
//! ```
//! use voidscript_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Position(f32);
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Velocity(f32);
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Frozen;
//!
//! let mut world = World::new();
//! world.register_component::<Position>("Position");
//! world.register_component::<Velocity>("Velocity");
//! world.register_component::<Frozen>("Frozen");
//! let moving = world.spawn_bundle(ComponentBundle::new().with(Position(0.0)).with(Velocity(2.0))).unwrap();
//! let frozen = world.spawn_bundle(ComponentBundle::new().with(Position(0.0)).with(Velocity(2.0)).with(Frozen)).unwrap();
//!
//! world
//!     .query_mut::<(&mut Position, &Velocity)>()
//!     .none::<(Frozen,)>()
//!     .each(|_, (pos, vel)| pos.0 += vel.0);
//!
//! assert_eq!(world.get_component::<Position>(moving), Some(&Position(2.0)));
//! assert_eq!(world.get_component::<Position>(frozen), Some(&Position(0.0)));
//! ```
//!
//! Visiting order is archetype creation order, then row order within an
//! archetype. It is stable for a given sequence of world mutations.
//!
//! Structural changes (spawn, insert, remove, despawn) cannot happen while a
//! query borrows the world; record them in a
//! [`CommandBuffer`](crate::command::CommandBuffer) and apply it afterwards.

use std::ops::ControlFlow;

use crate::archetype::{Archetype, ArchetypeId};
use crate::component::{BoxedComponent, ComponentRegistry, ComponentTypeId};
use crate::entity::Entity;
use crate::world::World;
use tracing::warn;

// ---------------------------------------------------------------------------
// QueryFilter
// ---------------------------------------------------------------------------

/// Descriptive filter over component sets.
///
/// * `all`: every listed type must be present.
/// * `any`: at least one listed type must be present (ignored when empty).
/// * `none`: no listed type may be present.
/// * exclusive: the entity's set must equal `all` exactly.
///
/// Exclusive replaces any `any`/`none` clauses, and `any`/`none` clauses
/// added afterwards are ignored: an exact set already decides both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilter {
    all: Vec<ComponentTypeId>,
    any: Vec<ComponentTypeId>,
    none: Vec<ComponentTypeId>,
    exclusive: bool,
    /// A required type is not registered, so nothing can match.
    unsatisfiable: bool,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(mut self, ids: impl IntoIterator<Item = ComponentTypeId>) -> Self {
        extend_unique(&mut self.all, ids);
        self
    }

    /// Require at least one of `ids`. Ignored on an exclusive filter.
    pub fn any(mut self, ids: impl IntoIterator<Item = ComponentTypeId>) -> Self {
        if self.exclusive {
            warn!(clause = "any", "clause added to an exclusive filter is ignored");
            return self;
        }
        extend_unique(&mut self.any, ids);
        self
    }

    /// Exclude every one of `ids`. Ignored on an exclusive filter.
    pub fn none(mut self, ids: impl IntoIterator<Item = ComponentTypeId>) -> Self {
        if self.exclusive {
            warn!(clause = "none", "clause added to an exclusive filter is ignored");
            return self;
        }
        extend_unique(&mut self.none, ids);
        self
    }

    /// Match entities whose component set is exactly `ids`.
    pub fn exclusive(mut self, ids: impl IntoIterator<Item = ComponentTypeId>) -> Self {
        self.all.clear();
        extend_unique(&mut self.all, ids);
        self.any.clear();
        self.none.clear();
        self.exclusive = true;
        self
    }

    // -- by name --------------------------------------------------------------

    /// Like [`all`](Self::all), by registered name. An unknown name makes
    /// the filter match nothing.
    pub fn all_named(self, registry: &ComponentRegistry, names: &[&str]) -> Self {
        let (ids, missing) = resolve_names(registry, names);
        let mut filter = self.all(ids);
        filter.unsatisfiable |= missing;
        filter
    }

    /// Like [`any`](Self::any), by registered name. Unknown names are skipped.
    pub fn any_named(self, registry: &ComponentRegistry, names: &[&str]) -> Self {
        self.any(resolve_names(registry, names).0)
    }

    /// Like [`none`](Self::none), by registered name. Unknown names exclude
    /// nothing.
    pub fn none_named(self, registry: &ComponentRegistry, names: &[&str]) -> Self {
        self.none(resolve_names(registry, names).0)
    }

    pub fn exclusive_named(self, registry: &ComponentRegistry, names: &[&str]) -> Self {
        let (ids, missing) = resolve_names(registry, names);
        let mut filter = self.exclusive(ids);
        filter.unsatisfiable |= missing;
        filter
    }

    // -- evaluation -----------------------------------------------------------

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// Whether a sorted component set satisfies the filter.
    pub fn matches(&self, types: &[ComponentTypeId]) -> bool {
        if self.unsatisfiable {
            return false;
        }
        let has = |id: &ComponentTypeId| types.binary_search(id).is_ok();
        if !self.all.iter().all(has) {
            return false;
        }
        if self.exclusive {
            return types.len() == self.all.len();
        }
        (self.any.is_empty() || self.any.iter().any(has)) && !self.none.iter().any(has)
    }

    fn mark_unsatisfiable(&mut self) {
        self.unsatisfiable = true;
    }
}

fn extend_unique(target: &mut Vec<ComponentTypeId>, ids: impl IntoIterator<Item = ComponentTypeId>) {
    for id in ids {
        if !target.contains(&id) {
            target.push(id);
        }
    }
}

fn resolve_names(registry: &ComponentRegistry, names: &[&str]) -> (Vec<ComponentTypeId>, bool) {
    let mut missing = false;
    let ids = names
        .iter()
        .filter_map(|name| {
            let id = registry.lookup_by_name(name);
            missing |= id.is_none();
            id
        })
        .collect();
    (ids, missing)
}

impl World {
    /// Archetypes matching `filter`, in creation order. Empty archetypes are
    /// skipped.
    pub fn execute_query(&self, filter: &QueryFilter) -> Vec<ArchetypeId> {
        self.archetypes
            .iter()
            .filter(|a| !a.is_empty() && filter.matches(a.component_types()))
            .map(Archetype::id)
            .collect()
    }

    /// Entities matching `filter`, in visiting order.
    pub fn matching_entities(&self, filter: &QueryFilter) -> Vec<Entity> {
        self.execute_query(filter)
            .into_iter()
            .flat_map(|id| self.archetypes[id.index()].entities().iter().copied())
            .collect()
    }

    /// Read-only typed query. `D` is a tuple of `&T`, or `()` to bind nothing.
    pub fn query<D: ReadOnlyQueryData>(&self) -> Query<'_, D> {
        Query::new(self)
    }

    /// Typed query that may bind `&mut T`.
    ///
    /// # Panics
    ///
    /// Panics if `D` names the same component type more than once.
    pub fn query_mut<D: QueryData>(&mut self) -> QueryMut<'_, D> {
        QueryMut::new(self)
    }
}

// ---------------------------------------------------------------------------
// ComponentSet -- type lists for any()/none()
// ---------------------------------------------------------------------------

/// A tuple of component types used as a `with`/`any`/`none` clause.
pub trait ComponentSet {
    /// One entry per listed type; `None` where the type is unregistered.
    fn lookup(registry: &ComponentRegistry) -> Vec<Option<ComponentTypeId>>;
}

macro_rules! impl_component_set {
    ($($T:ident),+) => {
        impl<$($T: 'static),+> ComponentSet for ($($T,)+) {
            fn lookup(registry: &ComponentRegistry) -> Vec<Option<ComponentTypeId>> {
                vec![$(registry.lookup::<$T>()),+]
            }
        }
    };
}

impl_component_set!(A);
impl_component_set!(A, B);
impl_component_set!(A, B, C);
impl_component_set!(A, B, C, D);
impl_component_set!(A, B, C, D, E);
impl_component_set!(A, B, C, D, E, F);

// ---------------------------------------------------------------------------
// QueryData -- what a query binds per entity
// ---------------------------------------------------------------------------

/// Something a query can bind per row: `&T`, `&mut T`, `()` or a tuple of
/// those.
///
/// Mutable iteration takes the needed columns out of the archetype
/// ([`extract`](Self::extract)), hands out disjoint borrows of them, and puts
/// them back ([`restore`](Self::restore)).
pub trait QueryData {
    type Item<'a>;
    /// Resolved component IDs.
    type State: Copy + 'static;
    /// Columns taken out of one archetype.
    type Fetch;

    /// `None` if any bound type is unregistered.
    fn init_state(registry: &ComponentRegistry) -> Option<Self::State>;
    /// `(id, mutable)` for each bound component.
    fn access(state: &Self::State, out: &mut Vec<(ComponentTypeId, bool)>);
    fn extract(state: &Self::State, archetype: &mut Archetype) -> Self::Fetch;
    fn restore(state: &Self::State, fetch: Self::Fetch, archetype: &mut Archetype);
    fn fetch(fetch: &mut Self::Fetch, row: usize) -> Self::Item<'_>;
}

/// Query data that only reads, and can therefore borrow columns in place.
pub trait ReadOnlyQueryData: QueryData {
    fn fetch_shared<'a>(state: &Self::State, archetype: &'a Archetype, row: usize) -> Self::Item<'a>;
}

fn downcast<T: 'static>(value: &BoxedComponent) -> &T {
    match value.downcast_ref::<T>() {
        Some(typed) => typed,
        None => panic!("column does not hold `{}`", std::any::type_name::<T>()),
    }
}

fn downcast_mut<T: 'static>(value: &mut BoxedComponent) -> &mut T {
    match value.downcast_mut::<T>() {
        Some(typed) => typed,
        None => panic!("column does not hold `{}`", std::any::type_name::<T>()),
    }
}

impl<T: Send + Sync + 'static> QueryData for &T {
    type Item<'a> = &'a T;
    type State = ComponentTypeId;
    type Fetch = Vec<BoxedComponent>;

    fn init_state(registry: &ComponentRegistry) -> Option<ComponentTypeId> {
        registry.lookup::<T>()
    }

    fn access(state: &ComponentTypeId, out: &mut Vec<(ComponentTypeId, bool)>) {
        out.push((*state, false));
    }

    fn extract(state: &ComponentTypeId, archetype: &mut Archetype) -> Self::Fetch {
        archetype.take_column(*state)
    }

    fn restore(state: &ComponentTypeId, fetch: Self::Fetch, archetype: &mut Archetype) {
        archetype.restore_column(*state, fetch);
    }

    fn fetch(fetch: &mut Self::Fetch, row: usize) -> &T {
        downcast(&fetch[row])
    }
}

impl<T: Send + Sync + 'static> ReadOnlyQueryData for &T {
    fn fetch_shared<'a>(state: &ComponentTypeId, archetype: &'a Archetype, row: usize) -> &'a T {
        match archetype.column(*state) {
            Some(column) => downcast(&column[row]),
            None => panic!("archetype has no column for `{}`", std::any::type_name::<T>()),
        }
    }
}

impl<T: Send + Sync + 'static> QueryData for &mut T {
    type Item<'a> = &'a mut T;
    type State = ComponentTypeId;
    type Fetch = Vec<BoxedComponent>;

    fn init_state(registry: &ComponentRegistry) -> Option<ComponentTypeId> {
        registry.lookup::<T>()
    }

    fn access(state: &ComponentTypeId, out: &mut Vec<(ComponentTypeId, bool)>) {
        out.push((*state, true));
    }

    fn extract(state: &ComponentTypeId, archetype: &mut Archetype) -> Self::Fetch {
        archetype.take_column(*state)
    }

    fn restore(state: &ComponentTypeId, fetch: Self::Fetch, archetype: &mut Archetype) {
        archetype.restore_column(*state, fetch);
    }

    fn fetch(fetch: &mut Self::Fetch, row: usize) -> &mut T {
        downcast_mut(&mut fetch[row])
    }
}

impl QueryData for () {
    type Item<'a> = ();
    type State = ();
    type Fetch = ();

    fn init_state(_registry: &ComponentRegistry) -> Option<()> {
        Some(())
    }

    fn access(_state: &(), _out: &mut Vec<(ComponentTypeId, bool)>) {}

    fn extract(_state: &(), _archetype: &mut Archetype) {}

    fn restore(_state: &(), _fetch: (), _archetype: &mut Archetype) {}

    fn fetch(_fetch: &mut (), _row: usize) {}
}

impl ReadOnlyQueryData for () {
    fn fetch_shared<'a>(_state: &(), _archetype: &'a Archetype, _row: usize) {}
}

macro_rules! impl_query_data_tuple {
    ($($P:ident : $idx:tt),+) => {
        impl<$($P: QueryData),+> QueryData for ($($P,)+) {
            type Item<'a> = ($($P::Item<'a>,)+);
            type State = ($($P::State,)+);
            type Fetch = ($($P::Fetch,)+);

            fn init_state(registry: &ComponentRegistry) -> Option<Self::State> {
                Some(($($P::init_state(registry)?,)+))
            }

            fn access(state: &Self::State, out: &mut Vec<(ComponentTypeId, bool)>) {
                $($P::access(&state.$idx, out);)+
            }

            fn extract(state: &Self::State, archetype: &mut Archetype) -> Self::Fetch {
                ($($P::extract(&state.$idx, archetype),)+)
            }

            fn restore(state: &Self::State, fetch: Self::Fetch, archetype: &mut Archetype) {
                $($P::restore(&state.$idx, fetch.$idx, archetype);)+
            }

            fn fetch(fetch: &mut Self::Fetch, row: usize) -> Self::Item<'_> {
                ($($P::fetch(&mut fetch.$idx, row),)+)
            }
        }

        impl<$($P: ReadOnlyQueryData),+> ReadOnlyQueryData for ($($P,)+) {
            fn fetch_shared<'a>(state: &Self::State, archetype: &'a Archetype, row: usize) -> Self::Item<'a> {
                ($($P::fetch_shared(&state.$idx, archetype, row),)+)
            }
        }
    };
}

impl_query_data_tuple!(A: 0);
impl_query_data_tuple!(A: 0, B: 1);
impl_query_data_tuple!(A: 0, B: 1, C: 2);
impl_query_data_tuple!(A: 0, B: 1, C: 2, D: 3);
impl_query_data_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4);
impl_query_data_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
impl_query_data_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
impl_query_data_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);


impl QueryFilter {
    fn require(mut self, ids: Vec<Option<ComponentTypeId>>) -> Self {
        self.unsatisfiable |= ids.iter().any(Option::is_none);
        self.all(ids.into_iter().flatten())
    }

    /// Exclusive over whatever `all` currently holds.
    fn close(mut self) -> Self {
        let all = std::mem::take(&mut self.all);
        self.exclusive(all)
    }
}

fn bind<D: QueryData>(registry: &ComponentRegistry) -> (Option<D::State>, Vec<(ComponentTypeId, bool)>) {
    let state = D::init_state(registry);
    let mut access = Vec::new();
    if let Some(state) = &state {
        D::access(state, &mut access);
    }
    (state, access)
}

fn base_filter(bound: &[(ComponentTypeId, bool)], resolved: bool) -> QueryFilter {
    let mut filter = QueryFilter::new().all(bound.iter().map(|&(id, _)| id));
    if !resolved {
        filter.mark_unsatisfiable();
    }
    filter
}

// ---------------------------------------------------------------------------
// Query -- shared access
// ---------------------------------------------------------------------------

/// Read-only typed query, created by [`World::query`].
pub struct Query<'w, D: ReadOnlyQueryData> {
    world: &'w World,
    state: Option<D::State>,
    filter: QueryFilter,
}

impl<'w, D: ReadOnlyQueryData> Query<'w, D> {
    fn new(world: &'w World) -> Self {
        let (state, access) = bind::<D>(&world.registry);
        let filter = base_filter(&access, state.is_some());
        Self { world, state, filter }
    }

    /// Also require these types, without binding them.
    pub fn with<S: ComponentSet>(mut self) -> Self {
        self.filter = self.filter.require(S::lookup(&self.world.registry));
        self
    }

    /// Require at least one of these types.
    pub fn any<S: ComponentSet>(mut self) -> Self {
        self.filter = self.filter.any(S::lookup(&self.world.registry).into_iter().flatten());
        self
    }

    /// Exclude entities holding any of these types.
    pub fn none<S: ComponentSet>(mut self) -> Self {
        self.filter = self.filter.none(S::lookup(&self.world.registry).into_iter().flatten());
        self
    }

    /// Only entities whose component set is exactly the required types.
    /// Drops earlier `any`/`none` clauses.
    pub fn exclusive(mut self) -> Self {
        self.filter = self.filter.close();
        self
    }

    pub fn filter(&self) -> &QueryFilter {
        &self.filter
    }

    pub fn iter(&self) -> QueryIter<'w, D> {
        let archetypes = match self.state {
            Some(_) => self.world.execute_query(&self.filter),
            None => Vec::new(),
        };
        QueryIter {
            world: self.world,
            state: self.state,
            archetypes,
            cursor: 0,
            row: 0,
        }
    }

    pub fn each(&self, mut f: impl FnMut(Entity, D::Item<'_>)) {
        for (entity, item) in self.iter() {
            f(entity, item);
        }
    }

    pub fn map<R>(&self, mut f: impl FnMut(Entity, D::Item<'_>) -> R) -> Vec<R> {
        self.iter().map(|(entity, item)| f(entity, item)).collect()
    }

    pub fn first(&self) -> Option<(Entity, D::Item<'w>)> {
        self.iter().next()
    }

    pub fn count(&self) -> usize {
        self.entities().len()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn entities(&self) -> Vec<Entity> {
        match self.state {
            Some(_) => self.world.matching_entities(&self.filter),
            None => Vec::new(),
        }
    }
}

impl<'w, D: ReadOnlyQueryData> IntoIterator for &Query<'w, D> {
    type Item = (Entity, D::Item<'w>);
    type IntoIter = QueryIter<'w, D>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a read-only [`Query`].
pub struct QueryIter<'w, D: ReadOnlyQueryData> {
    world: &'w World,
    state: Option<D::State>,
    archetypes: Vec<ArchetypeId>,
    cursor: usize,
    row: usize,
}

impl<'w, D: ReadOnlyQueryData> Iterator for QueryIter<'w, D> {
    type Item = (Entity, D::Item<'w>);

    fn next(&mut self) -> Option<Self::Item> {
        let state = self.state.as_ref()?;
        let world = self.world;
        loop {
            let id = *self.archetypes.get(self.cursor)?;
            let archetype = &world.archetypes[id.index()];
            if self.row < archetype.len() {
                let row = self.row;
                self.row += 1;
                return Some((archetype.entities()[row], D::fetch_shared(state, archetype, row)));
            }
            self.cursor += 1;
            self.row = 0;
        }
    }
}

// ---------------------------------------------------------------------------
// QueryMut -- exclusive access
// ---------------------------------------------------------------------------

/// Typed query that may bind `&mut T`, created by [`World::query_mut`].
///
/// Items are only available inside callbacks: every matched archetype has
/// its bound columns taken out for the duration of its rows.
pub struct QueryMut<'w, D: QueryData> {
    world: &'w mut World,
    state: Option<D::State>,
    filter: QueryFilter,
}

/// Puts taken columns back into their archetype on drop, so a callback that
/// unwinds does not leave the archetype without them.
struct ColumnGuard<'a, D: QueryData> {
    state: &'a D::State,
    archetype: &'a mut Archetype,
    fetch: Option<D::Fetch>,
}

impl<D: QueryData> Drop for ColumnGuard<'_, D> {
    fn drop(&mut self) {
        if let Some(fetch) = self.fetch.take() {
            D::restore(self.state, fetch, self.archetype);
        }
    }
}

impl<'w, D: QueryData> QueryMut<'w, D> {
    fn new(world: &'w mut World) -> Self {
        let (state, access) = bind::<D>(&world.registry);
        for (i, (id, _)) in access.iter().enumerate() {
            if access[..i].iter().any(|(other, _)| other == id) {
                let name = world.registry.name_of(*id);
                panic!("query binds component `{name}` more than once");
            }
        }
        let filter = base_filter(&access, state.is_some());
        Self { world, state, filter }
    }

    pub fn with<S: ComponentSet>(mut self) -> Self {
        self.filter = self.filter.require(S::lookup(&self.world.registry));
        self
    }

    pub fn any<S: ComponentSet>(mut self) -> Self {
        self.filter = self.filter.any(S::lookup(&self.world.registry).into_iter().flatten());
        self
    }

    pub fn none<S: ComponentSet>(mut self) -> Self {
        self.filter = self.filter.none(S::lookup(&self.world.registry).into_iter().flatten());
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.filter = self.filter.close();
        self
    }

    pub fn filter(&self) -> &QueryFilter {
        &self.filter
    }

    fn run(self, mut f: impl FnMut(Entity, D::Item<'_>) -> ControlFlow<()>) {
        let Some(state) = self.state else {
            return;
        };
        let matched = self.world.execute_query(&self.filter);
        for id in matched {
            let archetype = &mut self.world.archetypes[id.index()];
            let fetch = D::extract(&state, archetype);
            let mut guard = ColumnGuard::<D> {
                state: &state,
                archetype,
                fetch: Some(fetch),
            };
            let mut flow = ControlFlow::Continue(());
            if let Some(fetch) = guard.fetch.as_mut() {
                for (row, &entity) in guard.archetype.entities().iter().enumerate() {
                    flow = f(entity, D::fetch(fetch, row));
                    if flow.is_break() {
                        break;
                    }
                }
            }
            drop(guard);
            if flow.is_break() {
                return;
            }
        }
    }

    pub fn each(self, mut f: impl FnMut(Entity, D::Item<'_>)) {
        self.run(|entity, item| {
            f(entity, item);
            ControlFlow::Continue(())
        });
    }

    pub fn map<R>(self, mut f: impl FnMut(Entity, D::Item<'_>) -> R) -> Vec<R> {
        let mut out = Vec::new();
        self.run(|entity, item| {
            out.push(f(entity, item));
            ControlFlow::Continue(())
        });
        out
    }

    /// Call `f` on the first match only.
    pub fn first<R>(self, f: impl FnOnce(Entity, D::Item<'_>) -> R) -> Option<R> {
        let mut f = Some(f);
        let mut out = None;
        self.run(|entity, item| {
            if let Some(f) = f.take() {
                out = Some(f(entity, item));
            }
            ControlFlow::Break(())
        });
        out
    }

    pub fn count(&self) -> usize {
        self.entities().len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn entities(&self) -> Vec<Entity> {
        match self.state {
            Some(_) => self.world.matching_entities(&self.filter),
            None => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::ComponentBundle;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct X(i32);
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Y(i32);
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Z;

    /// A: [X], B: [X, Y], C: [Y]
    fn abc() -> (World, Entity, Entity, Entity) {
        let mut world = World::new();
        world.register_component::<X>("X");
        world.register_component::<Y>("Y");
        world.register_component::<Z>("Z");
        let a = world.spawn_with(X(1)).unwrap();
        let b = world
            .spawn_bundle(ComponentBundle::new().with(X(2)).with(Y(20)))
            .unwrap();
        let c = world.spawn_with(Y(30)).unwrap();
        (world, a, b, c)
    }

    fn sorted(mut v: Vec<Entity>) -> Vec<Entity> {
        v.sort();
        v
    }

    #[test]
    fn filter_kinds_select_expected_entities() {
        let (world, a, b, c) = abc();
        let x = world.component_type_id::<X>().unwrap();
        let y = world.component_type_id::<Y>().unwrap();

        let all_x = QueryFilter::new().all([x]);
        assert_eq!(sorted(world.matching_entities(&all_x)), vec![a, b]);

        let x_not_y = QueryFilter::new().all([x]).none([y]);
        assert_eq!(world.matching_entities(&x_not_y), vec![a]);

        let any_xy = QueryFilter::new().any([x, y]);
        assert_eq!(sorted(world.matching_entities(&any_xy)), vec![a, b, c]);

        let exact_xy = QueryFilter::new().exclusive([x, y]);
        assert_eq!(world.matching_entities(&exact_xy), vec![b]);
    }

    #[test]
    fn typed_queries_agree_with_filters() {
        let (world, a, b, c) = abc();
        assert_eq!(sorted(world.query::<(&X,)>().entities()), vec![a, b]);
        assert_eq!(world.query::<(&X,)>().none::<(Y,)>().entities(), vec![a]);
        assert_eq!(sorted(world.query::<()>().any::<(X, Y)>().entities()), vec![a, b, c]);
        assert_eq!(world.query::<(&X, &Y)>().exclusive().entities(), vec![b]);
    }

    #[test]
    fn exclusive_resets_any_and_none() {
        let (world, _, b, _) = abc();
        let q = world.query::<(&X, &Y)>().none::<(Y,)>().exclusive();
        assert_eq!(q.entities(), vec![b]);
    }

    #[test]
    fn clauses_after_exclusive_are_ignored() {
        let (world, a, _, _) = abc();
        let q = world.query::<(&X,)>().exclusive().none::<(X,)>().any::<(Z,)>();
        assert!(q.filter().is_exclusive());
        assert_eq!(q.entities(), vec![a]);

        let x = world.registry().lookup::<X>().unwrap();
        let y = world.registry().lookup::<Y>().unwrap();
        let filter = QueryFilter::new().exclusive([x]).any([y]).none([x]);
        assert_eq!(filter, QueryFilter::new().exclusive([x]));
    }

    #[test]
    fn panicking_callback_puts_columns_back() {
        let (mut world, a, b, _) = abc();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            world.query_mut::<(&mut X,)>().each(|_, (x,)| {
                x.0 += 100;
                panic!("callback failed");
            });
        }));
        assert!(result.is_err());
        // The first archetype was mid-iteration; the second was never taken.
        assert_eq!(world.get_component::<X>(a), Some(&X(101)));
        assert_eq!(world.get_component::<X>(b), Some(&X(2)));
        assert_eq!(world.query::<(&X,)>().count(), 2);
    }

    #[test]
    fn binds_in_listed_order() {
        let (world, _, b, _) = abc();
        let rows = world.query::<(&Y, &X)>().map(|e, (y, x)| (e, y.0, x.0));
        assert_eq!(rows, vec![(b, 20, 2)]);
    }

    #[test]
    fn unregistered_types_match_nothing() {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        struct Unknown;

        let (world, ..) = abc();
        assert!(world.query::<(&Unknown,)>().is_empty());
        assert_eq!(world.query::<(&X,)>().with::<(Unknown,)>().count(), 0);
        // Unknown exclusions exclude nothing.
        assert_eq!(world.query::<(&X,)>().none::<(Unknown,)>().count(), 2);

        let filter = QueryFilter::new().all_named(world.registry(), &["X", "Nope"]);
        assert!(world.matching_entities(&filter).is_empty());
        let filter = QueryFilter::new().none_named(world.registry(), &["Nope"]);
        assert_eq!(world.matching_entities(&filter).len(), 3);
    }

    #[test]
    fn mutable_query_writes_through() {
        let (mut world, a, b, _) = abc();
        world
            .query_mut::<(&mut X, &Y)>()
            .each(|_, (x, y)| x.0 += y.0);
        assert_eq!(world.get_component::<X>(a), Some(&X(1)));
        assert_eq!(world.get_component::<X>(b), Some(&X(22)));

        world.query_mut::<(&mut X,)>().each(|_, (x,)| x.0 *= 10);
        assert_eq!(world.get_component::<X>(a), Some(&X(10)));
        assert_eq!(world.get_component::<X>(b), Some(&X(220)));
    }

    #[test]
    fn mutable_first_stops_after_one() {
        let (mut world, ..) = abc();
        let mut calls = 0;
        let hit = world.query_mut::<(&mut X,)>().first(|e, (x,)| {
            calls += 1;
            x.0 = -1;
            e
        });
        assert!(hit.is_some());
        assert_eq!(calls, 1);
        assert_eq!(world.query::<(&X,)>().map(|_, (x,)| x.0).iter().filter(|v| **v == -1).count(), 1);
        // Columns are back in place after an early stop.
        assert_eq!(world.query::<(&X,)>().count(), 2);
    }

    #[test]
    #[should_panic(expected = "more than once")]
    fn duplicate_mutable_binding_panics() {
        let (mut world, ..) = abc();
        world.query_mut::<(&mut X, &X)>().each(|_, _| {});
    }

    #[test]
    fn visiting_order_is_archetype_then_row() {
        let (mut world, a, b, _) = abc();
        let a2 = world.spawn_with(X(3)).unwrap();
        let order: Vec<_> = world.query::<(&X,)>().iter().map(|(e, _)| e).collect();
        assert_eq!(order, vec![a, a2, b]);
    }

    #[test]
    fn despawned_entities_leave_queries() {
        let (mut world, a, b, _) = abc();
        world.despawn(a).unwrap();
        assert_eq!(world.query::<(&X,)>().entities(), vec![b]);
        let x = world.component_type_id::<X>().unwrap();
        // The archetype for [X] is now empty and skipped.
        assert_eq!(world.execute_query(&QueryFilter::new().all([x])).len(), 1);
    }
}
