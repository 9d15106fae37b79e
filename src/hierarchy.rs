//! Courier authority hierarchy
//!
//! Couriers live in a single table keyed by id. Parent links are plain ids;
//! [`CourierTree`] indexes a snapshot of that table as an arena so walks in
//! either direction are lookups, never owning pointers.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{validate_prefix, Courier, CourierLevel, CreateCourierRequest};
use crate::store::Store;

/// Arena-indexed snapshot of the courier table
#[derive(Debug, Clone, Default)]
pub struct CourierTree {
    nodes: Vec<Courier>,
    index: HashMap<Uuid, usize>,
    children: Vec<Vec<usize>>,
}

impl CourierTree {
    pub fn from_couriers(mut couriers: Vec<Courier>) -> Self {
        couriers.sort_by(|a, b| b.level.cmp(&a.level).then(a.id.cmp(&b.id)));

        let index: HashMap<Uuid, usize> = couriers
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id, i))
            .collect();

        let mut children = vec![Vec::new(); couriers.len()];
        for (i, courier) in couriers.iter().enumerate() {
            if let Some(parent) = courier.parent_id.and_then(|p| index.get(&p)) {
                children[*parent].push(i);
            }
        }

        Self {
            nodes: couriers,
            index,
            children,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&Courier> {
        self.index.get(&id).map(|&i| &self.nodes[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Courier> {
        self.nodes.iter()
    }

    pub fn children_of(&self, id: Uuid) -> impl Iterator<Item = &Courier> {
        self.index
            .get(&id)
            .map(|&i| self.children[i].as_slice())
            .unwrap_or_default()
            .iter()
            .map(move |&c| &self.nodes[c])
    }

    /// Parent chain from `id` upward, excluding `id` itself.
    ///
    /// Bounded by the table size so a corrupted chain cannot loop forever.
    pub fn ancestors(&self, id: Uuid) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            next: self.get(id).and_then(|c| c.parent_id),
            remaining: self.nodes.len(),
        }
    }

    /// Whether making `parent` the parent of `child` would close a loop
    pub fn would_cycle(&self, child: Uuid, parent: Uuid) -> bool {
        child == parent || self.ancestors(parent).any(|a| a.id == child)
    }

    /// Breadth-first walk of the subtree below `id` (exclusive).
    ///
    /// The iterator is lazy and `Clone`; cloning it before use, or calling
    /// this again, restarts the traversal.
    pub fn descendants(&self, id: Uuid) -> Descendants<'_> {
        let mut queue = VecDeque::new();
        if let Some(&root) = self.index.get(&id) {
            queue.extend(self.children[root].iter().copied());
        }
        Descendants { tree: self, queue }
    }
}

pub struct Ancestors<'a> {
    tree: &'a CourierTree,
    next: Option<Uuid>,
    remaining: usize,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a Courier;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let courier = self.tree.get(self.next?)?;
        self.next = courier.parent_id;
        Some(courier)
    }
}

#[derive(Clone)]
pub struct Descendants<'a> {
    tree: &'a CourierTree,
    queue: VecDeque<usize>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Courier;

    fn next(&mut self) -> Option<Self::Item> {
        let i = self.queue.pop_front()?;
        self.queue.extend(self.tree.children[i].iter().copied());
        Some(&self.tree.nodes[i])
    }
}

/// Check that `prefix` has the length `level` dictates and well-formed segments
pub fn check_level_prefix(level: CourierLevel, prefix: &str) -> Result<()> {
    validate_prefix(prefix)?;
    if prefix.len() != level.prefix_len() {
        return Err(AppError::PrefixMismatch(format!(
            "level {} courier needs a {}-character prefix, got {}",
            level.as_u8(),
            level.prefix_len(),
            prefix.len()
        )));
    }
    Ok(())
}

/// Parent's prefix must be a strict prefix of the child's
pub fn check_containment(parent: &Courier, child_prefix: &str) -> Result<()> {
    if child_prefix.len() <= parent.managed_prefix.len()
        || !child_prefix.starts_with(&parent.managed_prefix)
    {
        return Err(AppError::PrefixMismatch(format!(
            "courier {} does not strictly contain the requested scope",
            parent.id
        )));
    }
    Ok(())
}

/// What happens to a deactivated courier's direct reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildPolicy {
    /// Children move up to the deactivated courier's parent
    Reparent,
    /// The whole subtree is deactivated
    Deactivate,
}

/// Owner of courier records and their tree shape
#[derive(Clone)]
pub struct AuthorityHierarchy {
    store: Store,
}

impl AuthorityHierarchy {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Load the current courier table as a tree
    pub async fn snapshot(&self) -> Result<CourierTree> {
        Ok(CourierTree::from_couriers(self.store.list_couriers().await?))
    }

    pub async fn get_courier(&self, id: Uuid) -> Result<Courier> {
        self.store.get_courier(id).await
    }

    pub async fn create_courier(&self, request: CreateCourierRequest) -> Result<Courier> {
        check_level_prefix(request.level, &request.managed_prefix)?;

        let mut courier = Courier::new(
            request.name,
            request.level,
            request.managed_prefix,
            request.parent_id,
        );
        if let Some(score) = request.performance_score {
            courier.performance_score = score;
        }

        let candidate = courier.clone();
        self.store
            .insert_courier_checked(&courier, move |couriers| {
                let tree = CourierTree::from_couriers(couriers.to_vec());
                if let Some(parent_id) = candidate.parent_id {
                    let parent = tree.get(parent_id).ok_or_else(|| {
                        AppError::NotFound(format!("Courier {} not found", parent_id))
                    })?;
                    if tree.would_cycle(candidate.id, parent_id) {
                        return Err(AppError::HierarchyCycleDetected(format!(
                            "courier {} would become its own ancestor",
                            candidate.id
                        )));
                    }
                    check_containment(parent, &candidate.managed_prefix)?;
                }
                Ok(())
            })
            .await?;

        tracing::info!(
            courier_id = %courier.id,
            level = courier.level.as_u8(),
            parent_id = ?courier.parent_id,
            "Courier created"
        );

        Ok(courier)
    }

    /// Move a courier under a new parent (or make it a root)
    pub async fn reparent(&self, courier_id: Uuid, new_parent_id: Option<Uuid>) -> Result<Courier> {
        self.store
            .update_parent_checked(courier_id, new_parent_id, |couriers| {
                let tree = CourierTree::from_couriers(couriers.to_vec());
                let courier = tree
                    .get(courier_id)
                    .ok_or_else(|| AppError::NotFound(format!("Courier {} not found", courier_id)))?;

                if let Some(parent_id) = new_parent_id {
                    let parent = tree.get(parent_id).ok_or_else(|| {
                        AppError::NotFound(format!("Courier {} not found", parent_id))
                    })?;
                    if tree.would_cycle(courier_id, parent_id) {
                        return Err(AppError::HierarchyCycleDetected(format!(
                            "courier {} is an ancestor of courier {}",
                            courier_id, parent_id
                        )));
                    }
                    check_containment(parent, &courier.managed_prefix)?;
                }
                Ok(())
            })
            .await?;

        tracing::info!(%courier_id, new_parent_id = ?new_parent_id, "Courier reparented");
        self.store.get_courier(courier_id).await
    }

    /// Every courier below `courier_id`, breadth-first
    pub async fn descendants_of(&self, courier_id: Uuid) -> Result<Vec<Courier>> {
        let tree = self.snapshot().await?;
        if tree.get(courier_id).is_none() {
            return Err(AppError::NotFound(format!("Courier {} not found", courier_id)));
        }
        Ok(tree.descendants(courier_id).cloned().collect())
    }

    pub async fn effective_prefix(&self, courier_id: Uuid) -> Result<String> {
        Ok(self.store.get_courier(courier_id).await?.managed_prefix)
    }

    /// Deactivate a courier, handling its direct reports per `children`.
    ///
    /// Tasks referencing affected couriers are left untouched; they only
    /// lose future claim eligibility. Returns the ids deactivated.
    pub async fn deactivate(&self, courier_id: Uuid, children: ChildPolicy) -> Result<Vec<Uuid>> {
        let tree = self.snapshot().await?;
        let courier = tree
            .get(courier_id)
            .ok_or_else(|| AppError::NotFound(format!("Courier {} not found", courier_id)))?;

        let mut deactivate = vec![courier_id];
        let mut reparent = Vec::new();
        match children {
            ChildPolicy::Reparent => {
                reparent.extend(tree.children_of(courier_id).map(|c| (c.id, courier.parent_id)));
            }
            ChildPolicy::Deactivate => {
                deactivate.extend(tree.descendants(courier_id).map(|c| c.id));
            }
        }

        self.store.apply_deactivation(&deactivate, &reparent).await?;
        tracing::info!(
            %courier_id,
            deactivated = deactivate.len(),
            reparented = reparent.len(),
            "Courier deactivated"
        );

        Ok(deactivate)
    }

    pub async fn set_performance_score(&self, courier_id: Uuid, score: f64) -> Result<Courier> {
        if !score.is_finite() {
            return Err(AppError::BadRequest("performance score must be finite".to_string()));
        }
        self.store.update_performance_score(courier_id, score).await?;
        self.store.get_courier(courier_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Area, School};
    use crate::store::tests::setup_test_db;
    use chrono::Utc;

    fn courier(level: CourierLevel, prefix: &str, parent: Option<&Courier>) -> Courier {
        Courier::new(
            format!("c-{}", prefix),
            level,
            prefix,
            parent.map(|p| p.id),
        )
    }

    fn sample_tree() -> (CourierTree, Vec<Courier>) {
        let root = courier(CourierLevel::Global, "", None);
        let school = courier(CourierLevel::School, "PK", Some(&root));
        let area_a = courier(CourierLevel::Area, "PK5F", Some(&school));
        let area_b = courier(CourierLevel::Area, "PK3D", Some(&school));
        let point = courier(CourierLevel::Point, "PK5F3D", Some(&area_a));
        let all = vec![
            root.clone(),
            school.clone(),
            area_a.clone(),
            area_b.clone(),
            point.clone(),
        ];
        (CourierTree::from_couriers(all.clone()), all)
    }

    async fn seed_scopes(store: &Store) {
        for school in ["PK", "QH"] {
            store
                .insert_school(&School {
                    code: school.to_string(),
                    name: school.to_string(),
                    is_active: true,
                    managed_by: None,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        for (school, area) in [("PK", "5F"), ("PK", "3D"), ("QH", "5F")] {
            store
                .insert_area(&Area {
                    school: school.to_string(),
                    area: area.to_string(),
                    name: area.to_string(),
                    is_active: true,
                    managed_by: None,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
    }

    fn request(level: CourierLevel, prefix: &str, parent: Option<Uuid>) -> CreateCourierRequest {
        CreateCourierRequest {
            name: format!("c-{}", prefix),
            level,
            managed_prefix: prefix.to_string(),
            parent_id: parent,
            performance_score: None,
        }
    }

    #[test]
    fn test_tree_descendants_breadth_first() {
        let (tree, all) = sample_tree();
        let ids: Vec<Uuid> = tree.descendants(all[0].id).map(|c| c.id).collect();

        assert_eq!(ids.len(), 4);
        assert_eq!(ids[0], all[1].id);
        // Both area couriers come before the point courier
        assert!(ids[1..3].contains(&all[2].id));
        assert!(ids[1..3].contains(&all[3].id));
        assert_eq!(ids[3], all[4].id);
    }

    #[test]
    fn test_tree_descendants_restartable() {
        let (tree, all) = sample_tree();
        let walk = tree.descendants(all[1].id);
        let first: Vec<Uuid> = walk.clone().map(|c| c.id).collect();
        let second: Vec<Uuid> = walk.map(|c| c.id).collect();
        assert_eq!(first, second);
        assert_eq!(tree.descendants(all[4].id).count(), 0);
        assert_eq!(tree.descendants(Uuid::new_v4()).count(), 0);
    }

    #[test]
    fn test_tree_ancestors_and_cycles() {
        let (tree, all) = sample_tree();
        let chain: Vec<Uuid> = tree.ancestors(all[4].id).map(|c| c.id).collect();
        assert_eq!(chain, vec![all[2].id, all[1].id, all[0].id]);

        assert!(tree.would_cycle(all[1].id, all[4].id));
        assert!(tree.would_cycle(all[2].id, all[2].id));
        assert!(!tree.would_cycle(all[4].id, all[3].id));
    }

    #[test]
    fn test_ancestors_terminates_on_corrupt_loop() {
        let mut a = courier(CourierLevel::School, "PK", None);
        let mut b = courier(CourierLevel::Area, "PK5F", None);
        a.parent_id = Some(b.id);
        b.parent_id = Some(a.id);
        let tree = CourierTree::from_couriers(vec![a.clone(), b]);
        assert!(tree.ancestors(a.id).count() <= 2);
    }

    #[test]
    fn test_check_level_prefix() {
        assert!(check_level_prefix(CourierLevel::Global, "").is_ok());
        assert!(check_level_prefix(CourierLevel::Area, "PK5F").is_ok());
        assert!(matches!(
            check_level_prefix(CourierLevel::Area, "PK"),
            Err(AppError::PrefixMismatch(_))
        ));
        assert!(matches!(
            check_level_prefix(CourierLevel::School, "pk"),
            Err(AppError::InvalidCodeFormat(_))
        ));
    }

    #[test]
    fn test_check_containment_is_strict() {
        let parent = courier(CourierLevel::Area, "PK5F", None);
        assert!(check_containment(&parent, "PK5F3D").is_ok());
        assert!(check_containment(&parent, "PK5F").is_err());
        assert!(check_containment(&parent, "QH5F3D").is_err());
    }

    #[tokio::test]
    async fn test_create_courier_chain() {
        let store = setup_test_db().await;
        seed_scopes(&store).await;
        let hierarchy = AuthorityHierarchy::new(store.clone());

        let root = hierarchy
            .create_courier(request(CourierLevel::Global, "", None))
            .await
            .unwrap();
        let school = hierarchy
            .create_courier(request(CourierLevel::School, "PK", Some(root.id)))
            .await
            .unwrap();
        let area = hierarchy
            .create_courier(request(CourierLevel::Area, "PK5F", Some(school.id)))
            .await
            .unwrap();

        assert_eq!(hierarchy.effective_prefix(area.id).await.unwrap(), "PK5F");
        let below_root = hierarchy.descendants_of(root.id).await.unwrap();
        assert_eq!(below_root.len(), 2);
        assert_eq!(below_root[0].id, school.id);

        let pk = store.get_school("PK").await.unwrap().unwrap();
        assert_eq!(pk.managed_by, Some(school.id));
        let pk5f = store.get_area("PK", "5F").await.unwrap().unwrap();
        assert_eq!(pk5f.managed_by, Some(area.id));
    }

    #[tokio::test]
    async fn test_create_courier_prefix_mismatch() {
        let store = setup_test_db().await;
        seed_scopes(&store).await;
        let hierarchy = AuthorityHierarchy::new(store);

        let school = hierarchy
            .create_courier(request(CourierLevel::School, "PK", None))
            .await
            .unwrap();
        let result = hierarchy
            .create_courier(request(CourierLevel::Area, "QH5F", Some(school.id)))
            .await;
        assert!(matches!(result, Err(AppError::PrefixMismatch(_))));

        let result = hierarchy
            .create_courier(request(CourierLevel::Area, "PK", Some(school.id)))
            .await;
        assert!(matches!(result, Err(AppError::PrefixMismatch(_))));
    }

    #[tokio::test]
    async fn test_create_courier_unknown_scope() {
        let store = setup_test_db().await;
        seed_scopes(&store).await;
        let hierarchy = AuthorityHierarchy::new(store);

        let result = hierarchy
            .create_courier(request(CourierLevel::School, "ZZ", None))
            .await;
        assert!(matches!(result, Err(AppError::InvalidCodeFormat(_))));
    }

    #[tokio::test]
    async fn test_create_courier_in_retired_area_leaves_nothing() {
        let store = setup_test_db().await;
        seed_scopes(&store).await;
        store.deactivate_area("PK", "5F").await.unwrap();
        let hierarchy = AuthorityHierarchy::new(store.clone());

        let result = hierarchy
            .create_courier(request(CourierLevel::Area, "PK5F", None))
            .await;
        assert!(matches!(result, Err(AppError::InvalidCodeFormat(_))));
        assert!(store.list_couriers().await.unwrap().is_empty());
        let area = store.get_area("PK", "5F").await.unwrap().unwrap();
        assert_eq!(area.managed_by, None);
    }

    #[tokio::test]
    async fn test_create_courier_missing_parent() {
        let store = setup_test_db().await;
        seed_scopes(&store).await;
        let hierarchy = AuthorityHierarchy::new(store);

        let result = hierarchy
            .create_courier(request(CourierLevel::School, "PK", Some(Uuid::new_v4())))
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_reparent_detects_cycle() {
        let store = setup_test_db().await;
        seed_scopes(&store).await;
        let hierarchy = AuthorityHierarchy::new(store);

        let school = hierarchy
            .create_courier(request(CourierLevel::School, "PK", None))
            .await
            .unwrap();
        let area = hierarchy
            .create_courier(request(CourierLevel::Area, "PK5F", Some(school.id)))
            .await
            .unwrap();

        let result = hierarchy.reparent(school.id, Some(area.id)).await;
        assert!(matches!(result, Err(AppError::HierarchyCycleDetected(_))));
        let result = hierarchy.reparent(school.id, Some(school.id)).await;
        assert!(matches!(result, Err(AppError::HierarchyCycleDetected(_))));
    }

    #[tokio::test]
    async fn test_reparent_checks_containment() {
        let store = setup_test_db().await;
        seed_scopes(&store).await;
        let hierarchy = AuthorityHierarchy::new(store);

        let pk = hierarchy
            .create_courier(request(CourierLevel::School, "PK", None))
            .await
            .unwrap();
        let qh = hierarchy
            .create_courier(request(CourierLevel::School, "QH", None))
            .await
            .unwrap();
        let area = hierarchy
            .create_courier(request(CourierLevel::Area, "PK5F", Some(pk.id)))
            .await
            .unwrap();

        let result = hierarchy.reparent(area.id, Some(qh.id)).await;
        assert!(matches!(result, Err(AppError::PrefixMismatch(_))));

        let moved = hierarchy.reparent(area.id, None).await.unwrap();
        assert_eq!(moved.parent_id, None);
    }

    #[tokio::test]
    async fn test_deactivate_reparents_children() {
        let store = setup_test_db().await;
        seed_scopes(&store).await;
        let hierarchy = AuthorityHierarchy::new(store);

        let root = hierarchy
            .create_courier(request(CourierLevel::Global, "", None))
            .await
            .unwrap();
        let school = hierarchy
            .create_courier(request(CourierLevel::School, "PK", Some(root.id)))
            .await
            .unwrap();
        let area = hierarchy
            .create_courier(request(CourierLevel::Area, "PK5F", Some(school.id)))
            .await
            .unwrap();

        let deactivated = hierarchy
            .deactivate(school.id, ChildPolicy::Reparent)
            .await
            .unwrap();
        assert_eq!(deactivated, vec![school.id]);

        let area = hierarchy.get_courier(area.id).await.unwrap();
        assert_eq!(area.parent_id, Some(root.id));
        assert!(area.is_active);
        // The parent survives its child's removal
        assert!(hierarchy.get_courier(root.id).await.unwrap().is_active);
    }

    #[tokio::test]
    async fn test_deactivate_subtree() {
        let store = setup_test_db().await;
        seed_scopes(&store).await;
        let hierarchy = AuthorityHierarchy::new(store);

        let school = hierarchy
            .create_courier(request(CourierLevel::School, "PK", None))
            .await
            .unwrap();
        let area = hierarchy
            .create_courier(request(CourierLevel::Area, "PK5F", Some(school.id)))
            .await
            .unwrap();

        let deactivated = hierarchy
            .deactivate(school.id, ChildPolicy::Deactivate)
            .await
            .unwrap();
        assert_eq!(deactivated.len(), 2);
        assert!(!hierarchy.get_courier(area.id).await.unwrap().is_active);
    }

    #[tokio::test]
    async fn test_set_performance_score() {
        let store = setup_test_db().await;
        seed_scopes(&store).await;
        let hierarchy = AuthorityHierarchy::new(store);

        let courier = hierarchy
            .create_courier(request(CourierLevel::School, "PK", None))
            .await
            .unwrap();
        let updated = hierarchy.set_performance_score(courier.id, 4.5).await.unwrap();
        assert_eq!(updated.performance_score, 4.5);
        assert!(hierarchy.set_performance_score(courier.id, f64::NAN).await.is_err());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// For every generated chain, each parent's prefix strictly prefixes its child's
            #[test]
            fn prop_chain_prefixes_strictly_nest(segments in proptest::collection::vec("[0-9A-Z]{2}", 3)) {
                let root = courier(CourierLevel::Global, "", None);
                let mut chain = vec![root];
                let mut prefix = String::new();
                for (i, seg) in segments.iter().enumerate() {
                    prefix.push_str(seg);
                    let level = CourierLevel::try_from(3 - i as u8).unwrap();
                    prop_assert!(check_containment(chain.last().unwrap(), &prefix).is_ok());
                    let next = courier(level, &prefix, chain.last());
                    chain.push(next);
                }
                let tree = CourierTree::from_couriers(chain.clone());
                for c in &chain {
                    prop_assert!(!tree.ancestors(c.id).any(|a| a.id == c.id));
                    if let Some(parent) = c.parent_id.and_then(|p| tree.get(p)) {
                        prop_assert!(c.managed_prefix.starts_with(&parent.managed_prefix));
                        prop_assert!(c.managed_prefix.len() > parent.managed_prefix.len());
                    }
                }
            }
        }
    }
}
