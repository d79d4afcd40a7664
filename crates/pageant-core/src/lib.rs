use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

/// Equality tolerance for tied scores. Two values closer than this are the
/// same rank.
pub const DEFAULT_EPSILON: f64 = 1e-4;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum PageantError {
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PageantId(pub Ulid);

impl PageantId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for PageantId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for PageantId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct EntryId(pub Ulid);

impl EntryId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for EntryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Closed set of actor roles. Authorization procedures match exhaustively on
/// this enum, so an unrecognized role string fails at the parse boundary
/// instead of silently falling through a policy check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Organizer,
    Judge,
    Tabulator,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Organizer => "organizer",
            Self::Judge => "judge",
            Self::Tabulator => "tabulator",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Self::Admin),
            "organizer" => Some(Self::Organizer),
            "judge" => Some(Self::Judge),
            "tabulator" => Some(Self::Tabulator),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PageantStage {
    Setup,
    Ongoing,
    Completed,
}

impl PageantStage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Ongoing => "ongoing",
            Self::Completed => "completed",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "setup" => Some(Self::Setup),
            "ongoing" => Some(Self::Ongoing),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityAction {
    View,
    Create,
    Update,
    Delete,
    Restore,
    ForceDelete,
}

impl EntityAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Restore => "restore",
            Self::ForceDelete => "force_delete",
        }
    }
}

/// Caller-materialized view of the parent pageant a child entity (contestant,
/// criterion, round) belongs to. The pageant record itself is owned by the
/// persistence layer; evaluation only reads this snapshot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct PageantSnapshot {
    pub pageant_id: PageantId,
    pub stage: PageantStage,
    /// Permits otherwise-locked edits while the pageant is ongoing.
    pub temporary_edit: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RankDirection {
    #[serde(rename = "asc")]
    Ascending,
    #[default]
    #[serde(rename = "desc")]
    Descending,
}

impl RankDirection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ascending => "asc",
            Self::Descending => "desc",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScoreEntry {
    pub entry_id: EntryId,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Standing {
    pub rank: u32,
    pub entry_id: EntryId,
    pub value: f64,
}

/// Payload shape pushed to live-update subscribers of a pageant. The
/// broadcast transport is an external collaborator; this core only builds
/// the serializable payload deterministically.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaderboardUpdate {
    pub pageant_id: PageantId,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    pub direction: RankDirection,
    pub standings: Vec<Standing>,
}

fn validate_epsilon(epsilon: f64) -> Result<(), PageantError> {
    if !epsilon.is_finite() || epsilon < 0.0 {
        return Err(PageantError::Validation(
            "epsilon MUST be finite and non-negative".to_string(),
        ));
    }
    Ok(())
}

/// Missing or non-numeric scores sink below every real score regardless of
/// sort direction.
fn normalize_value(value: f64, direction: RankDirection) -> f64 {
    if value.is_finite() {
        return value;
    }
    match direction {
        RankDirection::Ascending => f64::INFINITY,
        RankDirection::Descending => f64::NEG_INFINITY,
    }
}

/// Sorted walk over the input producing `(input index, rank)` pairs in rank
/// order. Ties compare adjacent-pairwise against `epsilon`, so a chain of
/// near-ties shares one rank even when the total spread exceeds `epsilon`.
fn ranked_positions(
    normalized: &[f64],
    direction: RankDirection,
    epsilon: f64,
) -> Vec<(usize, u32)> {
    let mut order: Vec<usize> = (0..normalized.len()).collect();
    order.sort_by(|&lhs, &rhs| {
        let by_value = match direction {
            RankDirection::Ascending => normalized[lhs].total_cmp(&normalized[rhs]),
            RankDirection::Descending => normalized[rhs].total_cmp(&normalized[lhs]),
        };
        by_value.then_with(|| lhs.cmp(&rhs))
    });

    let mut ranked = Vec::with_capacity(order.len());
    let mut previous_value = f64::NAN;
    let mut previous_rank = 0_u32;
    for (position, index) in order.into_iter().enumerate() {
        let value = normalized[index];
        let rank = if position > 0 && (value - previous_value).abs() < epsilon {
            previous_rank
        } else {
            // Standard competition ranking: the next distinct value resumes
            // at its 1-based position, skipping numbers consumed by a tie.
            u32::try_from(position + 1).unwrap_or(u32::MAX)
        };
        previous_value = value;
        previous_rank = rank;
        ranked.push((index, rank));
    }
    ranked
}

/// Compute tie-aware competition ranks for arbitrary items.
///
/// Items whose values are within `epsilon` of their sorted neighbor share a
/// rank; the next distinct value's rank equals its 1-based sorted position.
/// Items with equal values keep their input order. If two items yield the
/// same id, the later one's rank overwrites the earlier one (caller
/// contract, not validated here).
///
/// # Errors
/// Returns [`PageantError::Validation`] when `epsilon` is negative or
/// non-finite.
pub fn compute_ranks<T, K, F, G>(
    items: &[T],
    value_of: F,
    id_of: G,
    direction: RankDirection,
    epsilon: f64,
) -> Result<BTreeMap<K, u32>, PageantError>
where
    K: Ord,
    F: Fn(&T) -> f64,
    G: Fn(&T) -> K,
{
    validate_epsilon(epsilon)?;

    let normalized = items
        .iter()
        .map(|item| normalize_value(value_of(item), direction))
        .collect::<Vec<_>>();

    let mut rank_of_index = vec![0_u32; items.len()];
    for (index, rank) in ranked_positions(&normalized, direction, epsilon) {
        rank_of_index[index] = rank;
    }

    // Insert in input order so that with duplicate ids the later item wins.
    let mut ranks = BTreeMap::new();
    for (index, item) in items.iter().enumerate() {
        ranks.insert(id_of(item), rank_of_index[index]);
    }
    Ok(ranks)
}

/// Rank concrete score rows, returning standings in rank order.
///
/// # Errors
/// Returns [`PageantError::Validation`] when `epsilon` is negative or
/// non-finite.
pub fn rank_entries(
    entries: &[ScoreEntry],
    direction: RankDirection,
    epsilon: f64,
) -> Result<Vec<Standing>, PageantError> {
    validate_epsilon(epsilon)?;

    let normalized = entries
        .iter()
        .map(|entry| normalize_value(entry.value, direction))
        .collect::<Vec<_>>();

    Ok(ranked_positions(&normalized, direction, epsilon)
        .into_iter()
        .map(|(index, rank)| Standing {
            rank,
            entry_id: entries[index].entry_id,
            value: entries[index].value,
        })
        .collect())
}

/// Build the live-update payload for a pageant's standings.
///
/// # Errors
/// Returns [`PageantError::Validation`] when `epsilon` is negative or
/// non-finite.
pub fn build_leaderboard_update(
    pageant_id: PageantId,
    entries: &[ScoreEntry],
    direction: RankDirection,
    epsilon: f64,
    generated_at: OffsetDateTime,
) -> Result<LeaderboardUpdate, PageantError> {
    Ok(LeaderboardUpdate {
        pageant_id,
        generated_at,
        direction,
        standings: rank_entries(entries, direction, epsilon)?,
    })
}

/// One materialized `(role, permission key) → granted` row, as read from the
/// external persistence layer.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct PermissionRule {
    pub role: Role,
    pub key: String,
    pub granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct PermissionUpdate {
    pub key: String,
    pub granted: bool,
}

/// Immutable-for-evaluation snapshot of the role/permission grant table.
/// Callers own the snapshot's lifecycle; mutation goes through
/// [`PermissionSet::apply_updates`] on an exclusive borrow.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct PermissionSet {
    grants: BTreeMap<Role, BTreeMap<String, bool>>,
}

impl PermissionSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Materialize from rule rows. Duplicate `(role, key)` rows are
    /// last-wins.
    #[must_use]
    pub fn from_rules<I>(rules: I) -> Self
    where
        I: IntoIterator<Item = PermissionRule>,
    {
        let mut set = Self::new();
        for rule in rules {
            set.grants.entry(rule.role).or_default().insert(rule.key, rule.granted);
        }
        set
    }

    /// Whether `role` holds `key`. Admin bypasses the grant table entirely,
    /// including for keys no rule has ever named; every other role is
    /// default-deny on a missing rule.
    #[must_use]
    pub fn has_permission(&self, role: Role, key: &str) -> bool {
        if role == Role::Admin {
            return true;
        }
        self.grants
            .get(&role)
            .and_then(|keys| keys.get(key))
            .copied()
            .unwrap_or(false)
    }

    /// Upsert grants for `role`. Keys not mentioned keep their prior value;
    /// nothing is revoked implicitly.
    ///
    /// # Errors
    /// Returns [`PageantError::Validation`] when an update names a blank
    /// permission key.
    pub fn apply_updates(
        &mut self,
        role: Role,
        updates: &[PermissionUpdate],
    ) -> Result<(), PageantError> {
        for update in updates {
            if update.key.trim().is_empty() {
                return Err(PageantError::Validation(
                    "permission key MUST be non-empty".to_string(),
                ));
            }
        }
        for update in updates {
            self.grants.entry(role).or_default().insert(update.key.clone(), update.granted);
        }
        Ok(())
    }

    /// Export the snapshot as rule rows, ordered by `(role, key)`.
    #[must_use]
    pub fn rules(&self) -> Vec<PermissionRule> {
        self.grants
            .iter()
            .flat_map(|(role, keys)| {
                keys.iter().map(|(key, granted)| PermissionRule {
                    role: *role,
                    key: key.clone(),
                    granted: *granted,
                })
            })
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.grants.values().all(BTreeMap::is_empty)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.grants.values().map(BTreeMap::len).sum()
    }
}

/// Single decision procedure for "may this role act on a child entity of a
/// pageant" (contestants, criteria, and rounds share these semantics).
///
/// Admin is allowed everything. An organizer must hold an assignment to the
/// parent pageant; once assigned they may view, and may create or update
/// unless the pageant is ongoing without a temporary-edit grant. Organizers
/// never delete, restore, or force-delete. Judges and tabulators are
/// view-only.
#[must_use]
pub fn entity_action_allowed(
    role: Role,
    action: EntityAction,
    pageant: &PageantSnapshot,
    organizer_assigned: bool,
) -> bool {
    match role {
        Role::Admin => true,
        Role::Organizer => {
            if !organizer_assigned {
                return false;
            }
            match action {
                EntityAction::View => true,
                EntityAction::Create | EntityAction::Update => {
                    pageant.stage != PageantStage::Ongoing || pageant.temporary_edit
                }
                EntityAction::Delete | EntityAction::Restore | EntityAction::ForceDelete => false,
            }
        }
        Role::Judge | Role::Tabulator => action == EntityAction::View,
    }
}
