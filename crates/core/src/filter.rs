//! Per-level object type selection.
//!
//! Each zoom level decides which point, line and area types it carries. A
//! filter is either open, a whitelist or a blacklist of full type codes.

use std::collections::BTreeSet;

use crate::object::{ObjectKind, ObjectType};

/// Type selection for one object category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TypeFilter {
    /// Every type passes.
    #[default]
    All,
    /// Only the listed types pass.
    Include(BTreeSet<ObjectType>),
    /// Every type except the listed ones passes.
    Exclude(BTreeSet<ObjectType>),
    /// Nothing passes.
    Nothing,
}

impl TypeFilter {
    /// Whitelist from full type codes.
    pub fn include<I>(codes: I) -> Self
    where
        I: IntoIterator<Item = u32>,
    {
        Self::Include(codes.into_iter().map(ObjectType::new).collect())
    }

    /// Blacklist from full type codes.
    pub fn exclude<I>(codes: I) -> Self
    where
        I: IntoIterator<Item = u32>,
    {
        Self::Exclude(codes.into_iter().map(ObjectType::new).collect())
    }

    pub fn allows(&self, object_type: ObjectType) -> bool {
        match self {
            Self::All => true,
            Self::Include(whitelist) => whitelist.contains(&object_type),
            Self::Exclude(blacklist) => !blacklist.contains(&object_type),
            Self::Nothing => false,
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, Self::All)
    }
}

/// Type filters for all three categories of one level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelFilter {
    pub points: TypeFilter,
    pub lines: TypeFilter,
    pub areas: TypeFilter,
}

impl LevelFilter {
    pub fn new(points: TypeFilter, lines: TypeFilter, areas: TypeFilter) -> Self {
        Self {
            points,
            lines,
            areas,
        }
    }

    pub fn for_kind(&self, kind: ObjectKind) -> &TypeFilter {
        match kind {
            ObjectKind::Point => &self.points,
            ObjectKind::Line => &self.lines,
            ObjectKind::Area => &self.areas,
        }
    }

    pub fn allows(&self, kind: ObjectKind, object_type: ObjectType) -> bool {
        self.for_kind(kind).allows(object_type)
    }
}
