use super::point_model;
use crate::errors::FabmError;
use crate::model::Collection;
use crate::variable::Variable;

#[test]
fn names_can_be_matched_ignoring_case() {
    let (model, _) = point_model();

    let mu = model.find_parameter("PHY/MU", true).unwrap();
    assert_eq!(mu.name(), "phy/mu");

    let err = model.find_parameter("PHY/MU", false).unwrap_err();
    assert!(matches!(
        err,
        FabmError::NotFound {
            collection: Collection::Parameters,
            ..
        }
    ));
    assert_eq!(err.to_string(), "PHY/MU not found in parameters");
}

#[test]
fn every_collection_is_searchable() {
    let (model, _) = point_model();

    assert_eq!(model.position(Collection::StateVariables, "sed", false).unwrap(), 4);
    assert_eq!(
        model
            .position(Collection::DiagnosticVariables, "Burial_Flux", true)
            .unwrap(),
        2
    );
    assert_eq!(model.position(Collection::Dependencies, "day_of_year", false).unwrap(), 3);
    assert_eq!(
        model
            .position(Collection::ConservedQuantities, "total_nitrogen", false)
            .unwrap(),
        0
    );
    assert!(model.find_coupling("phy/nutrient", false).is_ok());
}

#[test]
fn tables_are_cached_until_a_rebuild() {
    let (mut model, _) = point_model();
    assert_eq!(model.cached_lookup_tables(), 0);

    model.find_state_variable("phy", false).unwrap();
    model.find_state_variable("PHY", true).unwrap();
    model.find_state_variable("nut", false).unwrap();
    assert_eq!(model.cached_lookup_tables(), 2);

    model.set_parameter_by_name("det/n", 2).unwrap();
    assert_eq!(model.cached_lookup_tables(), 0);

    let det2 = model.find_state_variable("det2", false).unwrap();
    assert_eq!(det2.index(), 3);
    assert_eq!(model.cached_lookup_tables(), 1);
}

#[test]
fn coupling_options_come_from_the_core() {
    let (mut model, backend) = point_model();

    let coupling = model.find_coupling("phy/nutrient", false).unwrap();
    assert_eq!(coupling.master_path(), "nutrient");
    assert_eq!(coupling.long_path(), "phytoplankton/nutrient source");
    let options = coupling.options().unwrap();
    assert_eq!(options, vec!["nutrient", "detritus 1"]);
    assert_eq!(coupling.options().unwrap(), options);
    assert_eq!(backend.open_link_lists(), 0);

    model.set_parameter_by_name("det/n", 3).unwrap();
    let coupling = model.find_coupling("phy/nutrient", false).unwrap();
    assert_eq!(coupling.options().unwrap().len(), 4);
    assert_eq!(backend.open_link_lists(), 0);
}

#[test]
fn parameter_tree_groups_by_instance() {
    let (model, _) = point_model();
    let tree = model.parameter_tree();

    assert_eq!(tree.children.len(), 5);
    let phy = tree.get("phy").unwrap();
    assert_eq!(
        phy.children.keys().collect::<Vec<_>>(),
        vec!["m", "mu", "title", "use_light"]
    );
    let mu = tree.get("phy/mu").unwrap();
    assert!(mu.is_leaf());
    assert_eq!(model.parameters()[mu.parameter.unwrap()].name(), "phy/mu");
}
