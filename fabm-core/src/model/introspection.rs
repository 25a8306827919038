use super::Model;
use crate::errors::{FabmError, FabmResult};
use crate::variable::{Parameter, Variable};
use petgraph::dot::{Config, Dot};
use petgraph::graph::NodeIndex;
use petgraph::Graph;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Metadata of a (sub)model instance within a configured model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubModel {
    pub name: String,
    pub long_name: String,
    /// Whether the instance was declared in the configuration rather than created implicitly.
    pub user_created: bool,
}

/// Graph of couplings, pointing from slave to master, with nodes labelled by long path.
pub type CouplingGraph = Graph<String, ()>;

/// Parameters nested by the `/`-separated components of their names.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParameterTree {
    /// Position in [`Model::parameters`] of the parameter named by the path to this node.
    pub parameter: Option<usize>,
    pub children: BTreeMap<String, ParameterTree>,
}

impl ParameterTree {
    pub fn from_parameters(parameters: &[Parameter]) -> Self {
        let mut root = Self::default();
        for (index, parameter) in parameters.iter().enumerate() {
            let mut node = &mut root;
            for component in parameter.name().split('/') {
                node = node.children.entry(component.to_string()).or_default();
            }
            node.parameter = Some(index);
        }
        root
    }

    /// Node at a `/`-separated path.
    pub fn get(&self, path: &str) -> Option<&ParameterTree> {
        path.split('/')
            .try_fold(self, |node, component| node.children.get(component))
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    fn write(
        &self,
        f: &mut fmt::Formatter<'_>,
        indent: &str,
        label: &dyn Fn(usize) -> String,
    ) -> fmt::Result {
        for (name, node) in &self.children {
            match node.parameter {
                Some(index) if node.is_leaf() => {
                    writeln!(f, "{}{} = {}", indent, name, label(index))?
                }
                _ => {
                    writeln!(f, "{}{}", indent, name)?;
                    node.write(f, &format!("{}   ", indent), label)?;
                }
            }
        }
        Ok(())
    }
}

/// Printable overview of a model and its current values.
pub struct ModelSummary<'a> {
    model: &'a Model,
}

impl ModelSummary<'_> {
    fn section<V: Variable>(
        f: &mut fmt::Formatter<'_>,
        label: &str,
        items: &[V],
        value: impl Fn(usize) -> String,
    ) -> fmt::Result {
        if items.is_empty() {
            return Ok(());
        }
        writeln!(f, " {} {}:", items.len(), label)?;
        for (i, item) in items.iter().enumerate() {
            writeln!(f, "    {} = {} {}", item.name(), value(i), item.units())?;
        }
        Ok(())
    }
}

impl fmt::Display for ModelSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let model = self.model;
        let state = |offset: usize| {
            move |i: usize| {
                model
                    .state_value(offset + i)
                    .map(|v| v.to_string())
                    .unwrap_or_default()
            }
        };
        let counts = model.counts();
        let diagnostics = |offset: usize| {
            move |i: usize| match model.diagnostic_variables()[offset + i].value() {
                Some(value) => value.to_string(),
                None => "-".to_string(),
            }
        };

        writeln!(f, "FABM model contains the following:")?;
        Self::section(
            f,
            "interior state variables",
            model.interior_state_variables(),
            state(0),
        )?;
        Self::section(
            f,
            "surface state variables",
            model.surface_state_variables(),
            state(counts.interior_state),
        )?;
        Self::section(
            f,
            "bottom state variables",
            model.bottom_state_variables(),
            state(counts.interior_state + counts.surface_state),
        )?;
        Self::section(
            f,
            "interior diagnostic variables",
            model.interior_diagnostic_variables(),
            diagnostics(0),
        )?;
        Self::section(
            f,
            "horizontal diagnostic variables",
            model.horizontal_diagnostic_variables(),
            diagnostics(counts.interior_diagnostic),
        )?;
        Self::section(f, "external variables", model.dependencies(), |i| {
            model
                .dependency_value(i)
                .map(|v| v.to_string())
                .unwrap_or_default()
        })?;
        Self::section(f, "conserved quantities", model.conserved_quantities(), |_| {
            "-".to_string()
        })?;

        let parameters = model.parameters();
        writeln!(f, " {} parameters:", parameters.len())?;
        let label = |index: usize| {
            let parameter = &parameters[index];
            match parameter.value() {
                Ok(value) => format!("{} {}", value, parameter.units()),
                Err(_) => format!("? {}", parameter.units()),
            }
        };
        model.parameter_tree().write(f, "    ", &label)
    }
}

impl Model {
    /// Metadata of the (sub)model instance called `name`.
    pub fn submodel(&self, name: &str) -> FabmResult<SubModel> {
        if name.contains('\0') {
            return Err(FabmError::InvalidText(name.to_string()));
        }
        let metadata = self.backend.model_metadata(self.handle, name);
        self.check_error()?;
        Ok(SubModel {
            name: name.to_string(),
            long_name: metadata.long_name,
            user_created: metadata.user_created,
        })
    }

    pub fn parameter_tree(&self) -> ParameterTree {
        ParameterTree::from_parameters(&self.parameters)
    }

    pub fn summary(&self) -> ModelSummary<'_> {
        ModelSummary { model: self }
    }

    /// Couplings as a graph from each slave to the master currently supplying it.
    pub fn coupling_graph(&self) -> CouplingGraph {
        let mut graph = CouplingGraph::new();
        let mut nodes: HashMap<String, NodeIndex> = HashMap::new();
        let mut node = |graph: &mut CouplingGraph, path: String| {
            *nodes
                .entry(path.clone())
                .or_insert_with(|| graph.add_node(path))
        };
        for coupling in &self.couplings {
            let slave = node(&mut graph, coupling.long_path());
            let master = node(&mut graph, coupling.master_path());
            graph.add_edge(slave, master, ());
        }
        graph
    }

    /// Create a diagram of the coupling graph in DOT format.
    ///
    /// Useful for debugging.
    pub fn couplings_as_dot(&self) -> String {
        let graph = self.coupling_graph();
        format!("{:?}", Dot::with_config(&graph, &[Config::EdgeNoLabel]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_lookup_by_path() {
        let mut tree = ParameterTree::default();
        let phy = tree.children.entry("phy".to_string()).or_default();
        phy.children.insert(
            "mu".to_string(),
            ParameterTree {
                parameter: Some(0),
                children: BTreeMap::new(),
            },
        );

        assert_eq!(tree.get("phy/mu").and_then(|n| n.parameter), Some(0));
        assert!(tree.get("phy").is_some_and(|n| !n.is_leaf()));
        assert!(tree.get("det/r").is_none());
    }
}
