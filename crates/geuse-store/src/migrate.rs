//! Ordered single-step schema migrations over plain JSON trees.

use serde_json::Value;

use crate::error::StoreError;

/// A single-step schema migration. `up` and `down` are pure functions over the
/// raw JSON tree; they never touch disk.
pub trait Migration: Send + Sync {
    fn name(&self) -> &'static str;
    fn from_version(&self) -> u32;
    fn to_version(&self) -> u32;
    fn up(&self, state: Value) -> Result<Value, StoreError>;
    fn down(&self, state: Value) -> Result<Value, StoreError>;
}

/// Record of one applied migration step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStep {
    pub name: &'static str,
    pub from_version: u32,
    pub to_version: u32,
}

pub struct MigrationRunner {
    migrations: Vec<Box<dyn Migration>>,
}

impl Default for MigrationRunner {
    fn default() -> Self {
        Self::new(vec![Box::new(V1ToV2)])
    }
}

impl MigrationRunner {
    pub fn new(mut migrations: Vec<Box<dyn Migration>>) -> Self {
        migrations.sort_by_key(|m| m.from_version());
        Self { migrations }
    }

    /// Apply single-step migrations until `target_version` is reached.
    /// Errors when the on-disk version is newer than the runtime, or when the
    /// chain has a gap.
    pub fn upgrade(
        &self,
        state: Value,
        current_version: u32,
        target_version: u32,
    ) -> Result<(Value, Vec<MigrationStep>), StoreError> {
        if current_version > target_version {
            return Err(StoreError::Migration(format!(
                "state version {current_version} is newer than supported {target_version}"
            )));
        }

        let mut version = current_version;
        let mut migrated = state;
        let mut history = Vec::new();

        while version < target_version {
            let migration = self
                .migrations
                .iter()
                .find(|m| m.from_version() == version)
                .ok_or_else(|| {
                    StoreError::Migration(format!(
                        "no migration found from version {version} to reach {target_version}"
                    ))
                })?;
            migrated = migration.up(migrated)?;
            version = migration.to_version();
            history.push(MigrationStep {
                name: migration.name(),
                from_version: migration.from_version(),
                to_version: migration.to_version(),
            });
        }

        if let Value::Object(ref mut map) = migrated {
            map.insert("schema_version".into(), Value::from(version));
        }
        Ok((migrated, history))
    }

    /// Walk migrations backwards. Used by tests and backup restore.
    pub fn downgrade(
        &self,
        state: Value,
        current_version: u32,
        target_version: u32,
    ) -> Result<(Value, Vec<MigrationStep>), StoreError> {
        if current_version < target_version {
            return Err(StoreError::Migration(format!(
                "cannot downgrade from {current_version} to newer version {target_version}"
            )));
        }

        let mut version = current_version;
        let mut migrated = state;
        let mut history = Vec::new();

        while version > target_version {
            let migration = self
                .migrations
                .iter()
                .rev()
                .find(|m| m.to_version() == version)
                .ok_or_else(|| {
                    StoreError::Migration(format!(
                        "no reverse migration found from version {version} to reach {target_version}"
                    ))
                })?;
            migrated = migration.down(migrated)?;
            version = migration.from_version();
            history.push(MigrationStep {
                name: migration.name(),
                from_version: migration.to_version(),
                to_version: migration.from_version(),
            });
        }

        if let Value::Object(ref mut map) = migrated {
            map.insert("schema_version".into(), Value::from(version));
        }
        Ok((migrated, history))
    }

    /// Read the schema version out of a raw tree; missing or non-numeric
    /// values default to 1.
    pub fn extract_version(state: &Value) -> u32 {
        match state.get("schema_version") {
            Some(Value::Number(n)) => match n.as_u64() {
                Some(v) if v > 0 => v as u32,
                _ => 1,
            },
            Some(Value::String(s)) => s.parse::<u32>().ok().filter(|v| *v > 0).unwrap_or(1),
            _ => 1,
        }
    }
}

// ── v1 → v2 ──────────────────────────────────────────────────────────────────

/// Seeds `schema_version`, the `migration_history` container, and an empty
/// `resource_provenance` map on records written before version 2.
pub struct V1ToV2;

impl Migration for V1ToV2 {
    fn name(&self) -> &'static str {
        "v1_to_v2_add_schema_version"
    }

    fn from_version(&self) -> u32 {
        1
    }

    fn to_version(&self) -> u32 {
        2
    }

    fn up(&self, mut state: Value) -> Result<Value, StoreError> {
        let map = state
            .as_object_mut()
            .ok_or_else(|| StoreError::Migration("state is not a JSON object".into()))?;
        map.entry("schema_version").or_insert(Value::from(1));
        let history = map
            .entry("migration_history")
            .or_insert_with(|| Value::Array(vec![]));
        if let Value::Array(ref mut items) = history {
            items.push(Value::from(self.name()));
        }
        map.entry("resource_provenance")
            .or_insert_with(|| Value::Object(Default::default()));
        Ok(state)
    }

    fn down(&self, mut state: Value) -> Result<Value, StoreError> {
        let map = state
            .as_object_mut()
            .ok_or_else(|| StoreError::Migration("state is not a JSON object".into()))?;
        map.insert("schema_version".into(), Value::from(1));
        if let Some(Value::Array(items)) = map.get_mut("migration_history") {
            if items.last().and_then(|v| v.as_str()) == Some(self.name()) {
                items.pop();
            }
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn upgrade_applies_v1_to_v2() {
        let runner = MigrationRunner::default();
        let (migrated, history) = runner
            .upgrade(json!({"stack_name": "demo"}), 1, 2)
            .unwrap();
        assert_eq!(migrated["schema_version"], 2);
        assert_eq!(
            migrated["migration_history"],
            json!(["v1_to_v2_add_schema_version"])
        );
        assert!(migrated["resource_provenance"].is_object());
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].name, "v1_to_v2_add_schema_version");
    }

    #[test]
    fn upgrade_rejects_future_versions() {
        let runner = MigrationRunner::default();
        let err = runner.upgrade(json!({}), 3, 2).unwrap_err();
        assert!(matches!(err, StoreError::Migration(_)));
    }

    #[test]
    fn upgrade_errors_on_gap() {
        let runner = MigrationRunner::new(vec![]);
        let err = runner.upgrade(json!({}), 1, 2).unwrap_err();
        assert!(matches!(err, StoreError::Migration(_)));
    }

    #[test]
    fn downgrade_reverses_the_step() {
        let runner = MigrationRunner::default();
        let (up, _) = runner.upgrade(json!({"stack_name": "demo"}), 1, 2).unwrap();
        let (down, history) = runner.downgrade(up, 2, 1).unwrap();
        assert_eq!(down["schema_version"], 1);
        assert_eq!(down["migration_history"], json!([]));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn extract_version_defaults_to_one() {
        assert_eq!(MigrationRunner::extract_version(&json!({})), 1);
        assert_eq!(
            MigrationRunner::extract_version(&json!({"schema_version": "bogus"})),
            1
        );
        assert_eq!(
            MigrationRunner::extract_version(&json!({"schema_version": 0})),
            1
        );
        assert_eq!(
            MigrationRunner::extract_version(&json!({"schema_version": 2})),
            2
        );
    }
}
