use super::Model;
use crate::errors::{FabmError, FabmResult};
use crate::variable::{
    ConservedQuantity, Coupling, Dependency, DiagnosticVariable, Parameter, StateVariable, Variable,
};
use std::cell::OnceCell;
use std::collections::HashMap;
use std::fmt;

/// A searchable collection of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Parameters,
    Dependencies,
    StateVariables,
    DiagnosticVariables,
    Couplings,
    ConservedQuantities,
}

impl Collection {
    const COUNT: usize = 6;

    fn slot(self) -> usize {
        match self {
            Collection::Parameters => 0,
            Collection::Dependencies => 1,
            Collection::StateVariables => 2,
            Collection::DiagnosticVariables => 3,
            Collection::Couplings => 4,
            Collection::ConservedQuantities => 5,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Collection::Parameters => "parameters",
            Collection::Dependencies => "dependencies",
            Collection::StateVariables => "state variables",
            Collection::DiagnosticVariables => "diagnostic variables",
            Collection::Couplings => "couplings",
            Collection::ConservedQuantities => "conserved quantities",
        };
        write!(f, "{}", name)
    }
}

type NameTable = HashMap<String, usize>;

/// Name to position tables, built on first use.
///
/// One table per collection and per case mode. Replaced wholesale on every rebuild.
#[derive(Debug, Default)]
pub(super) struct LookupTables {
    exact: [OnceCell<NameTable>; Collection::COUNT],
    case_insensitive: [OnceCell<NameTable>; Collection::COUNT],
}

impl LookupTables {
    fn table<'a, I>(&self, collection: Collection, case_insensitive: bool, names: I) -> &NameTable
    where
        I: Iterator<Item = &'a str>,
    {
        let cells = if case_insensitive {
            &self.case_insensitive
        } else {
            &self.exact
        };
        cells[collection.slot()].get_or_init(|| {
            let mut table = NameTable::new();
            for (position, name) in names.enumerate() {
                // First occurrence wins
                table.entry(fold(name, case_insensitive)).or_insert(position);
            }
            table
        })
    }

    /// Number of tables built since the last rebuild.
    pub(super) fn built(&self) -> usize {
        self.exact
            .iter()
            .chain(self.case_insensitive.iter())
            .filter(|cell| cell.get().is_some())
            .count()
    }
}

fn fold(name: &str, case_insensitive: bool) -> String {
    if case_insensitive {
        name.to_lowercase()
    } else {
        name.to_string()
    }
}

fn names<V: Variable>(items: &[V]) -> impl Iterator<Item = &str> {
    items.iter().map(|item| item.name())
}

impl Model {
    /// Position of the object called `name` in a collection.
    pub fn position(
        &self,
        collection: Collection,
        name: &str,
        case_insensitive: bool,
    ) -> FabmResult<usize> {
        let table = match collection {
            Collection::Parameters => {
                self.lookup
                    .table(collection, case_insensitive, names(&self.parameters))
            }
            Collection::Dependencies => {
                self.lookup
                    .table(collection, case_insensitive, names(&self.dependencies))
            }
            Collection::StateVariables => {
                self.lookup
                    .table(collection, case_insensitive, names(&self.state_variables))
            }
            Collection::DiagnosticVariables => self.lookup.table(
                collection,
                case_insensitive,
                names(&self.diagnostic_variables),
            ),
            Collection::Couplings => {
                self.lookup
                    .table(collection, case_insensitive, names(&self.couplings))
            }
            Collection::ConservedQuantities => self.lookup.table(
                collection,
                case_insensitive,
                names(&self.conserved_quantities),
            ),
        };
        table
            .get(&fold(name, case_insensitive))
            .copied()
            .ok_or_else(|| FabmError::NotFound {
                name: name.to_string(),
                collection,
            })
    }

    pub fn find_parameter(&self, name: &str, case_insensitive: bool) -> FabmResult<&Parameter> {
        let index = self.position(Collection::Parameters, name, case_insensitive)?;
        Ok(&self.parameters[index])
    }

    pub fn find_dependency(&self, name: &str, case_insensitive: bool) -> FabmResult<&Dependency> {
        let index = self.position(Collection::Dependencies, name, case_insensitive)?;
        Ok(&self.dependencies[index])
    }

    pub fn find_state_variable(
        &self,
        name: &str,
        case_insensitive: bool,
    ) -> FabmResult<&StateVariable> {
        let index = self.position(Collection::StateVariables, name, case_insensitive)?;
        Ok(&self.state_variables[index])
    }

    pub fn find_diagnostic_variable(
        &self,
        name: &str,
        case_insensitive: bool,
    ) -> FabmResult<&DiagnosticVariable> {
        let index = self.position(Collection::DiagnosticVariables, name, case_insensitive)?;
        Ok(&self.diagnostic_variables[index])
    }

    pub fn find_coupling(&self, name: &str, case_insensitive: bool) -> FabmResult<&Coupling> {
        let index = self.position(Collection::Couplings, name, case_insensitive)?;
        Ok(&self.couplings[index])
    }

    pub fn find_conserved_quantity(
        &self,
        name: &str,
        case_insensitive: bool,
    ) -> FabmResult<&ConservedQuantity> {
        let index = self.position(Collection::ConservedQuantities, name, case_insensitive)?;
        Ok(&self.conserved_quantities[index])
    }

    /// Number of lookup tables currently cached.
    pub fn cached_lookup_tables(&self) -> usize {
        self.lookup.built()
    }

    /// Assign a value to every cell of the dependency called `name` and mark it as set.
    pub fn set_dependency(&mut self, name: &str, value: f64) -> FabmResult<()> {
        let index = self.position(Collection::Dependencies, name, false)?;
        self.set_dependency_value(index, value)
    }

    /// Assign a value to every cell of the state variable called `name`.
    pub fn set_state(&mut self, name: &str, value: f64) -> FabmResult<()> {
        let index = self.position(Collection::StateVariables, name, false)?;
        self.set_state_value(index, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_are_built_lazily_per_mode() {
        let tables = LookupTables::default();
        assert_eq!(tables.built(), 0);

        let names = ["Nut", "phy", "nut"];
        let exact = tables.table(Collection::StateVariables, false, names.iter().copied());
        assert_eq!(exact.get("nut"), Some(&2));
        assert_eq!(tables.built(), 1);

        let folded = tables.table(Collection::StateVariables, true, names.iter().copied());
        assert_eq!(folded.get("nut"), Some(&0));
        assert_eq!(tables.built(), 2);
    }

    #[test]
    fn collections_display_in_plain_words() {
        assert_eq!(Collection::StateVariables.to_string(), "state variables");
        assert_eq!(Collection::Couplings.to_string(), "couplings");
    }
}
