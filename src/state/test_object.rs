//! This module contains the test-object store: the per-path record of the
//! control-plane configuration a test must install to drive the program down
//! the path.
//!
//! Objects are immutable once stored; an update clones the object, modifies
//! the clone, and replaces the stored object wholesale.

use std::{collections::BTreeMap, fmt::Debug, rc::Rc};

use downcast_rs::{impl_downcast, Downcast};

use crate::ir::{decl::ActionCall, expr::ExprRef};

/// The store category for table configurations.
pub const CATEGORY_TABLES: &str = "tableconfigs";

/// The store category for register values.
pub const CATEGORY_REGISTERS: &str = "registervalues";

/// The store category for clone session information.
pub const CATEGORY_CLONE_INFOS: &str = "clone_infos";

/// The store category for action profiles.
pub const CATEGORY_ACTION_PROFILES: &str = "action_profile";

/// An object recorded for test generation.
///
/// # Self Bounds
///
/// The bounds on `Self` are required for the following reasons:
///
/// - [`Debug`] to provide representations to aid in debugging. It is
///   recommended to use the derive feature for this.
/// - [`Downcast`] so that the steppers can recover the concrete object type
///   when updating a stored object.
pub trait TestObject
where
    Self: Debug + Downcast,
{
    /// Gets a short label describing the kind of the object.
    fn object_kind(&self) -> &'static str;
}

impl_downcast!(TestObject);

/// A dynamically dispatched, shared test object.
pub type TestObjectRef = Rc<dyn TestObject>;

/// The category-keyed store of test objects carried by an execution state.
#[derive(Clone, Debug, Default)]
pub struct TestObjectStore {
    categories: BTreeMap<String, BTreeMap<String, TestObjectRef>>,
}

impl TestObjectStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the object stored under `category` and `name`.
    #[must_use]
    pub fn get(&self, category: &str, name: &str) -> Option<TestObjectRef> {
        self.categories
            .get(category)
            .and_then(|objects| objects.get(name))
            .cloned()
    }

    /// Stores `object` under `category` and `name`, replacing any previous
    /// object wholesale.
    pub fn set(
        &mut self,
        category: impl Into<String>,
        name: impl Into<String>,
        object: TestObjectRef,
    ) {
        self.categories
            .entry(category.into())
            .or_default()
            .insert(name.into(), object);
    }

    /// Gets all objects stored under `category` in name order.
    #[must_use]
    pub fn category(&self, category: &str) -> Vec<(String, TestObjectRef)> {
        self.categories
            .get(category)
            .map(|objects| {
                objects
                    .iter()
                    .map(|(name, object)| (name.clone(), object.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// How a synthesized entry matches against one key of a table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FieldMatch {
    /// The key must equal the entry value exactly.
    Exact { value: ExprRef },

    /// The key is compared under a mask; both value and mask are free.
    Ternary { value: ExprRef, mask: ExprRef },

    /// The key is compared under a prefix of the provided symbolic length.
    Lpm { value: ExprRef, prefix_length: ExprRef },

    /// The key must fall within an inclusive range.
    Range { low: ExprRef, high: ExprRef },
}

/// A single synthesized control-plane entry for a table.
#[derive(Clone, Debug)]
pub struct TableRule {
    /// The per-key matches of the entry, keyed by control-plane key name.
    pub matches: BTreeMap<String, FieldMatch>,

    /// The control-plane priority of the entry.
    pub priority: u32,

    /// The action invoked when the entry matches, with its synthesized
    /// arguments.
    pub call: ActionCall,

    /// The time-to-live of the entry in seconds.
    pub ttl: u32,
}

/// The control-plane configuration of one table along a path.
#[derive(Clone, Debug, Default)]
pub struct TableConfig {
    /// The entries the control plane must install.
    rules: Vec<TableRule>,

    /// The name of the action profile backing the table, when one exists.
    profile: Option<String>,
}

impl TableConfig {
    /// Creates a configuration holding the provided `rules`.
    #[must_use]
    pub fn new(rules: Vec<TableRule>) -> Self {
        Self {
            rules,
            profile: None,
        }
    }

    /// Records that the table is backed by the named action profile.
    pub fn set_profile(&mut self, profile: impl Into<String>) {
        self.profile = Some(profile.into());
    }

    /// Gets the entries the control plane must install.
    #[must_use]
    pub fn rules(&self) -> &[TableRule] {
        &self.rules
    }

    /// Gets the name of the action profile backing the table, if any.
    #[must_use]
    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }
}

impl TestObject for TableConfig {
    fn object_kind(&self) -> &'static str {
        "table_config"
    }
}

/// The symbolic contents of one register instance along a path.
///
/// Reads produce a chain of ternary choices over the recorded writes, most
/// recent write first, bottoming out at the initial value.
#[derive(Clone, Debug)]
pub struct RegisterValue {
    /// The value every cell holds before the first write.
    initial: ExprRef,

    /// The `(index, value)` writes applied so far, oldest first.
    writes: Vec<(ExprRef, ExprRef)>,
}

impl RegisterValue {
    /// Creates a register whose cells all hold `initial`.
    #[must_use]
    pub fn new(initial: ExprRef) -> Self {
        Self {
            initial,
            writes: Vec::new(),
        }
    }

    /// Records a write of `value` at `index`.
    pub fn add_condition(&mut self, index: ExprRef, value: ExprRef) {
        self.writes.push((index, value));
    }

    /// Computes the value read at `index` as a chain of ternary choices
    /// over the recorded writes.
    #[must_use]
    pub fn current_value(&self, index: &ExprRef) -> ExprRef {
        use crate::ir::expr::Expression;

        let mut value = self.initial.clone();
        for (written_index, written_value) in &self.writes {
            let ty = written_value.ty();
            let cond = Expression::equals(index.clone(), written_index.clone());
            value = Expression::mux(ty, cond, written_value.clone(), value);
        }
        value
    }
}

impl TestObject for RegisterValue {
    fn object_kind(&self) -> &'static str {
        "register_value"
    }
}

/// The information recorded about one clone session along a path.
#[derive(Clone, Debug)]
pub struct CloneInfo {
    /// The session identifier passed to the clone call.
    pub session: ExprRef,

    /// The port the cloned packet leaves on.
    pub port: ExprRef,

    /// Whether this state is the clone (`true`) or the original packet that
    /// continues unchanged (`false`).
    pub is_clone: bool,
}

impl TestObject for CloneInfo {
    fn object_kind(&self) -> &'static str {
        "clone_info"
    }
}

/// The contents of one action profile along a path.
///
/// Tables backed by a profile record the action to execute by its index in
/// the profile's member list rather than by name.
#[derive(Clone, Debug, Default)]
pub struct ActionProfile {
    /// The profile members added so far: the action name and its synthesized
    /// control-plane arguments.
    members: Vec<(String, Vec<(String, ExprRef)>)>,
}

impl ActionProfile {
    /// Creates an empty profile.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the number of members in the profile.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Adds a member invoking `action` with the provided `args`, returning
    /// the new member's index.
    pub fn add_member(&mut self, action: impl Into<String>, args: Vec<(String, ExprRef)>) -> usize {
        self.members.push((action.into(), args));
        self.members.len() - 1
    }

    /// Gets the profile members in insertion order.
    #[must_use]
    pub fn members(&self) -> &[(String, Vec<(String, ExprRef)>)] {
        &self.members
    }
}

impl TestObject for ActionProfile {
    fn object_kind(&self) -> &'static str {
        "action_profile"
    }
}

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use crate::{
        ir::{expr::Expression, types::Type},
        state::test_object::{RegisterValue, TestObjectStore, CATEGORY_REGISTERS},
    };

    #[test]
    fn updates_replace_objects_wholesale() {
        let ty = Type::bits(8);
        let mut store = TestObjectStore::new();
        store.set(
            CATEGORY_REGISTERS,
            "r",
            Rc::new(RegisterValue::new(Expression::constant(ty.clone(), 0))),
        );

        // Clone out, modify, and replace.
        let stored = store.get(CATEGORY_REGISTERS, "r").unwrap();
        let mut updated = stored
            .downcast_ref::<RegisterValue>()
            .expect("stored object is a register")
            .clone();
        updated.add_condition(
            Expression::constant(ty.clone(), 1),
            Expression::constant(ty.clone(), 42),
        );
        store.set(CATEGORY_REGISTERS, "r", Rc::new(updated));

        let reread = store.get(CATEGORY_REGISTERS, "r").unwrap();
        let register = reread.downcast_ref::<RegisterValue>().unwrap();
        let value = register.current_value(&Expression::constant(ty, 1));
        // The single matching write folds away to its written value.
        assert_eq!(value.as_u64(), Some(42));
    }
}
