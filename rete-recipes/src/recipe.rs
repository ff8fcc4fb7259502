//! A recipe is the canonical description of one node: its operator
//! kind, the parameters of that operator, and the recipes of the
//! nodes it consumes.  Recipes compare and hash by value, so two
//! structurally identical sub-plans are the same key and end up as
//! the same node, even if the compiler built them independently.
//!
//! Operand recipes are shared through `Arc`s; compiled plans are
//! DAGs, and cloning a recipe never copies its operands.
use crate::expression::Expression;
use crate::key::InputKey;
use crate::key::Seed;
use crate::mask::TupleMask;
use crate::value::Value;
use std::sync::Arc;

pub type RecipeRef = Arc<Recipe>;

/// Identifies the query a production node answers for.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct QueryId(Arc<str>);

impl QueryId {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(name.into())
    }

    #[cfg(not(tarpaulin_include))]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&str> for QueryId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl std::fmt::Display for QueryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A multiset aggregation over one column.  Only values with a
/// positive multiplicity take part; a group with none has no result.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum AggregateOperator {
    /// Total multiplicity; ignores the column.
    Count,
    /// Sum of the values, weighted by multiplicity.
    Sum,
    Min,
    Max,
}

impl AggregateOperator {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Recipe {
    /// The extension of `key` restricted to `seed`.
    Input { key: InputKey, seed: Seed },
    /// Keeps the parent tuples whose projection through `mask` (or
    /// the whole tuple) belongs to the stateless relation `key`.
    InputFilter {
        parent: RecipeRef,
        key: InputKey,
        mask: Option<TupleMask>,
    },
    /// Multiset projection: keeps duplicates.
    Projection { parent: RecipeRef, mask: TupleMask },
    /// Collapses multiplicities to set semantics.
    Distinct { parent: RecipeRef },
    ConstantFilter {
        parent: RecipeRef,
        position: usize,
        value: Value,
    },
    /// Keeps tuples where every listed position holds the same value.
    EqualityFilter {
        parent: RecipeRef,
        positions: Vec<usize>,
    },
    /// Keeps tuples where `subject` differs from every `inequals`.
    InequalityFilter {
        parent: RecipeRef,
        subject: usize,
        inequals: Vec<usize>,
    },
    /// Natural join on `primary_mask` = `secondary_mask`; the output
    /// is the primary tuple followed by the secondary's non-key values.
    Join {
        primary: RecipeRef,
        secondary: RecipeRef,
        primary_mask: TupleMask,
        secondary_mask: TupleMask,
    },
    /// Primary tuples with no secondary match on the masks.
    Antijoin {
        primary: RecipeRef,
        secondary: RecipeRef,
        primary_mask: TupleMask,
        secondary_mask: TupleMask,
    },
    Union { parents: Vec<RecipeRef> },
    /// Groups by `group_mask` and appends the group's multiplicity.
    Count {
        parent: RecipeRef,
        group_mask: TupleMask,
    },
    /// Groups by `group_mask` and appends `operator` applied to the
    /// values in `column`.
    Aggregate {
        parent: RecipeRef,
        group_mask: TupleMask,
        column: usize,
        operator: AggregateOperator,
    },
    /// Keeps the tuples for which `expression` holds.
    Check {
        parent: RecipeRef,
        expression: Expression,
    },
    /// Appends the value of `expression` to every tuple; tuples it
    /// fails to evaluate on are dropped.
    Eval {
        parent: RecipeRef,
        expression: Expression,
    },
    /// Transitive closure of a binary relation.
    TransitiveClosure { parent: RecipeRef },
    /// The terminal node of `query`.
    Production { parent: RecipeRef, query: QueryId },
}

impl Recipe {
    #[must_use]
    pub fn input(key: InputKey) -> RecipeRef {
        let seed = Seed::unbound(key.arity());
        Arc::new(Self::Input { key, seed })
    }

    #[must_use]
    pub fn seeded_input(key: InputKey, seed: Seed) -> RecipeRef {
        Arc::new(Self::Input { key, seed })
    }

    #[must_use]
    pub fn input_filter(parent: RecipeRef, key: InputKey, mask: Option<TupleMask>) -> RecipeRef {
        Arc::new(Self::InputFilter { parent, key, mask })
    }

    #[must_use]
    pub fn projection(parent: RecipeRef, mask: TupleMask) -> RecipeRef {
        Arc::new(Self::Projection { parent, mask })
    }

    #[must_use]
    pub fn distinct(parent: RecipeRef) -> RecipeRef {
        Arc::new(Self::Distinct { parent })
    }

    #[must_use]
    pub fn constant_filter(parent: RecipeRef, position: usize, value: Value) -> RecipeRef {
        Arc::new(Self::ConstantFilter {
            parent,
            position,
            value,
        })
    }

    #[must_use]
    pub fn equality_filter(parent: RecipeRef, positions: Vec<usize>) -> RecipeRef {
        Arc::new(Self::EqualityFilter { parent, positions })
    }

    #[must_use]
    pub fn inequality_filter(parent: RecipeRef, subject: usize, inequals: Vec<usize>) -> RecipeRef {
        Arc::new(Self::InequalityFilter {
            parent,
            subject,
            inequals,
        })
    }

    #[must_use]
    pub fn join(
        primary: RecipeRef,
        secondary: RecipeRef,
        primary_mask: TupleMask,
        secondary_mask: TupleMask,
    ) -> RecipeRef {
        Arc::new(Self::Join {
            primary,
            secondary,
            primary_mask,
            secondary_mask,
        })
    }

    #[must_use]
    pub fn antijoin(
        primary: RecipeRef,
        secondary: RecipeRef,
        primary_mask: TupleMask,
        secondary_mask: TupleMask,
    ) -> RecipeRef {
        Arc::new(Self::Antijoin {
            primary,
            secondary,
            primary_mask,
            secondary_mask,
        })
    }

    #[must_use]
    pub fn union(parents: Vec<RecipeRef>) -> RecipeRef {
        Arc::new(Self::Union { parents })
    }

    #[must_use]
    pub fn count(parent: RecipeRef, group_mask: TupleMask) -> RecipeRef {
        Arc::new(Self::Count { parent, group_mask })
    }

    #[must_use]
    pub fn aggregate(
        parent: RecipeRef,
        group_mask: TupleMask,
        column: usize,
        operator: AggregateOperator,
    ) -> RecipeRef {
        Arc::new(Self::Aggregate {
            parent,
            group_mask,
            column,
            operator,
        })
    }

    #[must_use]
    pub fn check(parent: RecipeRef, expression: Expression) -> RecipeRef {
        Arc::new(Self::Check { parent, expression })
    }

    #[must_use]
    pub fn eval(parent: RecipeRef, expression: Expression) -> RecipeRef {
        Arc::new(Self::Eval { parent, expression })
    }

    #[must_use]
    pub fn transitive_closure(parent: RecipeRef) -> RecipeRef {
        Arc::new(Self::TransitiveClosure { parent })
    }

    #[must_use]
    pub fn production(parent: RecipeRef, query: QueryId) -> RecipeRef {
        Arc::new(Self::Production { parent, query })
    }

    /// Returns a short name for the operator kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Input { .. } => "input",
            Self::InputFilter { .. } => "input-filter",
            Self::Projection { .. } => "projection",
            Self::Distinct { .. } => "distinct",
            Self::ConstantFilter { .. } => "constant-filter",
            Self::EqualityFilter { .. } => "equality-filter",
            Self::InequalityFilter { .. } => "inequality-filter",
            Self::Join { .. } => "join",
            Self::Antijoin { .. } => "antijoin",
            Self::Union { .. } => "union",
            Self::Count { .. } => "count",
            Self::Aggregate { .. } => "aggregate",
            Self::Check { .. } => "check",
            Self::Eval { .. } => "eval",
            Self::TransitiveClosure { .. } => "transitive-closure",
            Self::Production { .. } => "production",
        }
    }

    /// Returns the operand recipes, in slot order.
    #[must_use]
    pub fn parents(&self) -> Vec<&RecipeRef> {
        match self {
            Self::Input { .. } => Vec::new(),
            Self::InputFilter { parent, .. }
            | Self::Projection { parent, .. }
            | Self::Distinct { parent }
            | Self::ConstantFilter { parent, .. }
            | Self::EqualityFilter { parent, .. }
            | Self::InequalityFilter { parent, .. }
            | Self::Count { parent, .. }
            | Self::Aggregate { parent, .. }
            | Self::Check { parent, .. }
            | Self::Eval { parent, .. }
            | Self::TransitiveClosure { parent }
            | Self::Production { parent, .. } => vec![parent],
            Self::Join {
                primary, secondary, ..
            }
            | Self::Antijoin {
                primary, secondary, ..
            } => vec![primary, secondary],
            Self::Union { parents } => parents.iter().collect(),
        }
    }

    /// Checks that every operand has the shape its operator expects,
    /// recursively, and returns the arity of the tuples this recipe
    /// produces.
    ///
    /// # Errors
    ///
    /// Returns `Err` on any shape mismatch.
    pub fn validate(&self) -> Result<usize, &'static str> {
        let in_bounds = |positions: &[usize], width: usize| positions.iter().all(|x| *x < width);

        match self {
            Self::Input { key, seed } => {
                if seed.arity() != key.arity() {
                    return Err("Seed arity does not match its input key.");
                }

                Ok(key.arity())
            }
            Self::InputFilter { parent, key, mask } => {
                let arity = parent.validate()?;
                let checked = match mask {
                    Some(mask) if mask.source_width() != arity => {
                        return Err("Filter mask width does not match its parent.");
                    }
                    Some(mask) => mask.width(),
                    None => arity,
                };

                if checked != key.arity() {
                    return Err("Filtered tuples do not match the input key's arity.");
                }

                Ok(arity)
            }
            Self::Projection { parent, mask } => {
                if parent.validate()? != mask.source_width() {
                    return Err("Projection mask width does not match its parent.");
                }

                Ok(mask.width())
            }
            Self::Distinct { parent } => parent.validate(),
            Self::ConstantFilter {
                parent, position, ..
            } => {
                let arity = parent.validate()?;
                if *position >= arity {
                    return Err("Constant filter position out of bounds.");
                }

                Ok(arity)
            }
            Self::EqualityFilter { parent, positions } => {
                let arity = parent.validate()?;
                if !in_bounds(positions, arity) {
                    return Err("Equality filter position out of bounds.");
                }

                Ok(arity)
            }
            Self::InequalityFilter {
                parent,
                subject,
                inequals,
            } => {
                let arity = parent.validate()?;
                if *subject >= arity || !in_bounds(inequals, arity) {
                    return Err("Inequality filter position out of bounds.");
                }

                Ok(arity)
            }
            Self::Join {
                primary,
                secondary,
                primary_mask,
                secondary_mask,
            } => {
                let (left, right) =
                    check_join_masks(primary, secondary, primary_mask, secondary_mask)?;
                Ok(left + right - secondary_mask.width())
            }
            Self::Antijoin {
                primary,
                secondary,
                primary_mask,
                secondary_mask,
            } => {
                let (left, _) = check_join_masks(primary, secondary, primary_mask, secondary_mask)?;
                Ok(left)
            }
            Self::Union { parents } => {
                let mut arity = None;
                for parent in parents {
                    let current = parent.validate()?;
                    if *arity.get_or_insert(current) != current {
                        return Err("Union operands have different arities.");
                    }
                }

                arity.ok_or("Union must have at least one operand.")
            }
            Self::Count { parent, group_mask } => {
                if parent.validate()? != group_mask.source_width() {
                    return Err("Group mask width does not match its parent.");
                }

                Ok(group_mask.width() + 1)
            }
            Self::Aggregate {
                parent,
                group_mask,
                column,
                ..
            } => {
                let arity = parent.validate()?;
                if arity != group_mask.source_width() {
                    return Err("Group mask width does not match its parent.");
                }

                if *column >= arity {
                    return Err("Aggregated column out of bounds.");
                }

                Ok(group_mask.width() + 1)
            }
            Self::Check { parent, expression } => {
                let arity = parent.validate()?;
                if expression.max_column().map_or(false, |column| column >= arity) {
                    return Err("Check expression column out of bounds.");
                }

                Ok(arity)
            }
            Self::Eval { parent, expression } => {
                let arity = parent.validate()?;
                if expression.max_column().map_or(false, |column| column >= arity) {
                    return Err("Eval expression column out of bounds.");
                }

                Ok(arity + 1)
            }
            Self::TransitiveClosure { parent } => {
                if parent.validate()? != 2 {
                    return Err("Transitive closure expects a binary relation.");
                }

                Ok(2)
            }
            Self::Production { parent, .. } => parent.validate(),
        }
    }
}

fn check_join_masks(
    primary: &Recipe,
    secondary: &Recipe,
    primary_mask: &TupleMask,
    secondary_mask: &TupleMask,
) -> Result<(usize, usize), &'static str> {
    let left = primary.validate()?;
    let right = secondary.validate()?;

    if primary_mask.source_width() != left || secondary_mask.source_width() != right {
        return Err("Join mask width does not match its operand.");
    }

    if primary_mask.width() != secondary_mask.width() {
        return Err("Join masks project to different widths.");
    }

    Ok((left, right))
}

/// A compiled query: its identity, the names of its parameters, and
/// the production recipe at the root of its plan.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct CompiledQuery {
    id: QueryId,
    parameters: Vec<String>,
    root: RecipeRef,
}

impl CompiledQuery {
    /// Wraps `body` in a production recipe for `id`.
    ///
    /// # Errors
    ///
    /// Returns `Err` when `body` is malformed, or when the number of
    /// parameters differs from the arity of `body`.
    pub fn new(
        id: QueryId,
        parameters: Vec<String>,
        body: RecipeRef,
    ) -> Result<Self, &'static str> {
        if body.validate()? != parameters.len() {
            return Err("Parameter count does not match the query body's arity.");
        }

        let root = Recipe::production(body, id.clone());
        Ok(Self {
            id,
            parameters,
            root,
        })
    }

    #[must_use]
    pub fn id(&self) -> &QueryId {
        &self.id
    }

    #[must_use]
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    #[must_use]
    pub fn root(&self) -> &RecipeRef {
        &self.root
    }

    #[must_use]
    pub fn arity(&self) -> usize {
        self.parameters.len()
    }
}

#[cfg(test)]
fn foo() -> RecipeRef {
    Recipe::input(InputKey::enumerable("Foo", 1))
}

#[test]
fn test_structural_equality() {
    let left = Recipe::join(foo(), foo(), TupleMask::empty(1), TupleMask::empty(1));
    let right = Recipe::join(foo(), foo(), TupleMask::empty(1), TupleMask::empty(1));

    assert!(!Arc::ptr_eq(&left, &right));
    assert_eq!(left, right);

    let mut map = std::collections::HashMap::new();
    map.insert(left, 1);
    assert_eq!(map.get(&right), Some(&1));
}

#[test]
fn test_join_arity() {
    let edge = Recipe::input(InputKey::enumerable("Edge", 2));
    let path = Recipe::join(
        edge.clone(),
        edge,
        TupleMask::new(vec![1], 2).expect("ok"),
        TupleMask::new(vec![0], 2).expect("ok"),
    );

    assert_eq!(path.validate(), Ok(3));
    assert_eq!(path.parents().len(), 2);
    assert_eq!(path.kind(), "join");
}

#[test]
fn test_validation_errors() {
    let mismatch = Recipe::join(foo(), foo(), TupleMask::identity(1), TupleMask::empty(1));
    assert!(mismatch.validate().is_err());

    assert!(Recipe::union(vec![]).validate().is_err());
    assert!(Recipe::transitive_closure(foo()).validate().is_err());
    assert!(Recipe::constant_filter(foo(), 1, Value::new(0)).validate().is_err());

    let bad_seed = Recipe::seeded_input(InputKey::enumerable("Foo", 1), Seed::unbound(2));
    assert!(bad_seed.validate().is_err());
}

#[test]
fn test_count_arity() {
    let edge = Recipe::input(InputKey::enumerable("Edge", 2));
    let count = Recipe::count(edge, TupleMask::new(vec![0], 2).expect("ok"));
    assert_eq!(count.validate(), Ok(2));
}

#[test]
fn test_compiled_query() {
    let query = CompiledQuery::new("foo".into(), vec!["x".into()], foo()).expect("ok");
    assert_eq!(query.arity(), 1);
    assert_eq!(query.root().kind(), "production");
    assert_eq!(query.root().parents()[0], &foo());

    assert!(CompiledQuery::new("foo".into(), vec![], foo()).is_err());
}

#[test]
fn test_aggregate_and_eval_arity() {
    use crate::expression::BinaryOp;

    let edge = Recipe::input(InputKey::enumerable("Edge", 2));
    let by_source = TupleMask::new(vec![0], 2).expect("ok");
    let heaviest = Recipe::aggregate(edge.clone(), by_source.clone(), 1, AggregateOperator::Max);
    assert_eq!(heaviest.validate(), Ok(2));
    assert_eq!(heaviest.kind(), "aggregate");

    let out_of_bounds = Recipe::aggregate(edge.clone(), by_source, 2, AggregateOperator::Sum);
    assert!(out_of_bounds.validate().is_err());

    let span = Expression::binary(BinaryOp::Sub, Expression::column(1), Expression::column(0));
    assert_eq!(Recipe::eval(edge.clone(), span.clone()).validate(), Ok(3));
    assert_eq!(Recipe::check(edge.clone(), span).validate(), Ok(2));
    assert!(Recipe::check(edge, Expression::column(5)).validate().is_err());
}
