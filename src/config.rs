use crc32fast::Hasher;

/// Static configuration describing how a SeaORM model participates in a tree.
#[derive(Clone, Debug)]
pub struct TreeConfig {
    entity_name: String,
    use_global_active: bool,
    default_sort: DefaultSort,
    constraint_delete: bool,
    advisory_lock_strategy: AdvisoryLockStrategy,
}

impl TreeConfig {
    /// Create a configuration for the given logical entity name.
    pub fn new(entity_name: impl Into<String>) -> Self {
        let entity_name = entity_name.into();
        let default_lock =
            AdvisoryLockStrategy::Namespaced(AdvisoryLockKey::derived_from(&entity_name));

        Self {
            entity_name,
            use_global_active: true,
            default_sort: DefaultSort::default(),
            constraint_delete: false,
            advisory_lock_strategy: default_lock,
        }
    }

    /// Merge options produced by [`TreeOptions`].
    pub(crate) fn apply_options(mut self, options: TreeOptions) -> Self {
        if let Some(flag) = options.use_global_active {
            self.use_global_active = flag;
        }
        if let Some(default_sort) = options.default_sort {
            self.default_sort = default_sort;
        }
        if let Some(flag) = options.constraint_delete {
            self.constraint_delete = flag;
        }
        if let Some(strategy) = options.advisory_lock_strategy {
            self.advisory_lock_strategy = strategy;
        }
        self
    }

    /// Logical name of the node entity.
    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    /// Whether the derived `global_active` column is maintained.
    pub fn use_global_active(&self) -> bool {
        self.use_global_active
    }

    /// Sort value assigned when an insert omits one.
    pub fn default_sort(&self) -> DefaultSort {
        self.default_sort
    }

    /// Edge rows are removed by `ON DELETE CASCADE` foreign keys declared by the host.
    pub fn constraint_delete(&self) -> bool {
        self.constraint_delete
    }

    /// Advisory lock strategy (PostgreSQL only).
    pub fn advisory_lock_strategy(&self) -> &AdvisoryLockStrategy {
        &self.advisory_lock_strategy
    }
}

/// Builder-style options consumed by the derive macro.
#[derive(Clone, Debug, Default)]
pub struct TreeOptions {
    use_global_active: Option<bool>,
    default_sort: Option<DefaultSort>,
    constraint_delete: Option<bool>,
    advisory_lock_strategy: Option<AdvisoryLockStrategy>,
}

impl TreeOptions {
    pub fn use_global_active(mut self, value: bool) -> Self {
        self.use_global_active = Some(value);
        self
    }

    pub fn default_sort(mut self, value: DefaultSort) -> Self {
        self.default_sort = Some(value);
        self
    }

    pub fn constraint_delete(mut self, value: bool) -> Self {
        self.constraint_delete = Some(value);
        self
    }

    pub fn advisory_lock_strategy(mut self, strategy: AdvisoryLockStrategy) -> Self {
        self.advisory_lock_strategy = Some(strategy);
        self
    }

    pub fn apply(self, base: TreeConfig) -> TreeConfig {
        base.apply_options(self)
    }
}

/// Sort key used for nodes inserted without an explicit `sort`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum DefaultSort {
    /// One more than the largest sort currently stored in the table.
    #[default]
    AfterLast,
    Fixed(i32),
}

/// Key used for PostgreSQL advisory locks.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct AdvisoryLockKey(String);

impl AdvisoryLockKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    fn derived_from(entity: &str) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(entity.as_bytes());
        let crc = hasher.finalize();
        Self(format!("tree-tables::{entity}::{crc:x}"))
    }
}

/// Configuration describing how to acquire advisory locks.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AdvisoryLockStrategy {
    Disabled,
    Namespaced(AdvisoryLockKey),
}

impl AdvisoryLockStrategy {
    pub fn key(&self) -> Option<&AdvisoryLockKey> {
        match self {
            AdvisoryLockStrategy::Disabled => None,
            AdvisoryLockStrategy::Namespaced(key) => Some(key),
        }
    }
}
