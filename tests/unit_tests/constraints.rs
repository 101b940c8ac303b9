use matrixcompare::assert_scalar_eq;
use nalgebra::{DMatrix, DVector};
use visco_fem::assembly::{assemble_poisson_cell, FeValues};
use visco_fem::comm::SerialComm;
use visco_fem::config::SourceTerm;
use visco_fem::constraints::{interpolate_boundary_values, make_hanging_node_constraints, AffineConstraints};
use visco_fem::dofs::DofHandler;
use visco_fem::fe::FeQ;
use visco_fem::la::{make_sparsity_pattern, BackendKind, DistributedMatrix, DistributedVector, SolverControl};
use visco_fem::mesh::Triangulation;
use visco_fem::quadrature::gauss_2d;

/// A 4 × 4 mesh with two refined cells, which leaves hanging nodes on several faces.
fn mesh_with_hanging_nodes() -> Triangulation {
    let mut tria = Triangulation::hyper_cube(1);
    tria.refine_global(2);
    tria.set_refine_flag(3);
    tria.set_refine_flag(12);
    tria.execute_coarsening_and_refinement();
    assert!(tria.is_balanced());
    tria
}

fn linear_field(point: &[f64; 2]) -> f64 {
    0.3 + 2.0 * point[0] - 1.5 * point[1]
}

#[test]
fn hanging_node_constraints_reproduce_linear_fields() {
    let tria = mesh_with_hanging_nodes();
    for degree in 1..=3 {
        let dofs = DofHandler::distribute_dofs(&tria, &FeQ::new(degree));
        let mut constraints = AffineConstraints::new();
        make_hanging_node_constraints(&tria, &dofs, &mut constraints);
        constraints.close();
        assert!(constraints.n_constraints() > 0);
        assert!(constraints.has_hanging_constraints());

        let mut values: Vec<f64> = dofs.support_points().iter().map(linear_field).collect();
        for line in constraints.lines() {
            values[line.index] = 1.0e3;
        }
        constraints.distribute(&mut values);

        for (dof, point) in dofs.support_points().iter().enumerate() {
            assert_scalar_eq!(values[dof], linear_field(point), comp = abs, tol = 1e-12);
        }
    }
}

#[test]
fn closed_constraints_refer_to_unconstrained_dofs_only() {
    let tria = mesh_with_hanging_nodes();
    let dofs = DofHandler::distribute_dofs(&tria, &FeQ::new(2));
    let mut constraints = AffineConstraints::new();
    make_hanging_node_constraints(&tria, &dofs, &mut constraints);
    interpolate_boundary_values(&dofs, 0.0, &mut constraints);
    assert!(!constraints.is_closed());
    constraints.close();
    assert!(constraints.is_closed());

    for dof in dofs.boundary_dofs().iter() {
        assert!(constraints.is_constrained(dof));
    }
    for line in constraints.lines() {
        for (master, _) in &line.entries {
            assert!(!constraints.is_constrained(*master));
        }
    }
    let indices: Vec<usize> = constraints.lines().iter().map(|line| line.index).collect();
    assert!(indices.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn distribute_is_idempotent() {
    let tria = mesh_with_hanging_nodes();
    let dofs = DofHandler::distribute_dofs(&tria, &FeQ::new(3));
    let mut constraints = AffineConstraints::new();
    make_hanging_node_constraints(&tria, &dofs, &mut constraints);
    interpolate_boundary_values(&dofs, 0.5, &mut constraints);
    constraints.close();

    let mut values: Vec<f64> = (0..dofs.n_dofs()).map(|i| (i as f64).sin()).collect();
    constraints.distribute(&mut values);
    let once = values.clone();
    constraints.distribute(&mut values);
    assert_eq!(values, once);
}

#[test]
fn constant_dirichlet_data_gives_constant_solution() {
    let tria = mesh_with_hanging_nodes();
    let fe = FeQ::new(2);
    let dofs = DofHandler::distribute_dofs(&tria, &fe);
    let mut constraints = AffineConstraints::new();
    make_hanging_node_constraints(&tria, &dofs, &mut constraints);
    interpolate_boundary_values(&dofs, 1.0, &mut constraints);
    constraints.close();

    let comm = SerialComm;
    let owned = dofs.owned_range(0);
    let mut matrix = DistributedMatrix::new(make_sparsity_pattern(&dofs, &constraints), owned.clone());
    let mut rhs = DistributedVector::zeros(dofs.n_dofs(), owned.clone());
    let mut fe_values = FeValues::new(&fe, gauss_2d(3));
    let mut cell_matrix = DMatrix::zeros(0, 0);
    let mut cell_rhs = DVector::zeros(0);
    for cell_index in 0..tria.n_active_cells() {
        fe_values.reinit(&tria.cell(cell_index));
        assemble_poisson_cell(&fe_values, &SourceTerm::Constant { value: 0.0 }, &mut cell_matrix, &mut cell_rhs);
        let cell_dofs = dofs.cell_dofs(cell_index);
        constraints.distribute_local_to_global(&cell_matrix, &cell_rhs, cell_dofs, &mut matrix, &mut rhs);
    }
    matrix.compress_add(&comm);
    rhs.compress_add(&comm);
    assert!(matrix.symmetry_defect() < 1e-12);

    let mut solution = DistributedVector::zeros(dofs.n_dofs(), owned);
    let control = SolverControl {
        max_iterations: 500,
        tolerance: 1e-12,
    };
    BackendKind::default()
        .create()
        .solve(&matrix, &mut solution, &rhs, &control, &comm)
        .unwrap();
    constraints.distribute_parallel(&mut solution, &comm);

    for &value in solution.as_slice() {
        assert_scalar_eq!(value, 1.0, comp = abs, tol = 1e-8);
    }
}
