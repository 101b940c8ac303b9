use crate::{constant_source, run_on_thread_ranks, small_poisson_config};
use matrixcompare::assert_scalar_eq;
use visco_fem::comm::{Communicator, SerialComm};
use visco_fem::config::PoissonConfig;
use visco_fem::poisson::{AdaptivePoisson, CycleSummary};

#[test]
fn assembled_matrix_is_symmetric_with_positive_diagonal() {
    let config = PoissonConfig {
        initial_refinement: 5,
        ..PoissonConfig::default()
    };
    let mut poisson = AdaptivePoisson::new(config, SerialComm);
    poisson.initialize_mesh();
    assert_eq!(poisson.triangulation().n_active_cells(), 1024);
    poisson.setup_system().unwrap();
    poisson.assemble_system().unwrap();

    let system = poisson.system().unwrap();
    let matrix = &system.system_matrix;
    assert_eq!(matrix.nrows(), system.dofs.n_dofs());
    // 32 x 32 cells of Q2 give a 65 x 65 lattice of nodes
    assert_eq!(system.dofs.n_dofs(), 65 * 65);
    assert!(matrix.symmetry_defect() < 1e-12);
    for i in 0..matrix.nrows() {
        assert!(matrix.diagonal(i) > 0.0, "Diagonal entry {} is not positive", i);
    }
}

#[test]
fn solve_before_setup_is_an_error() {
    let mut poisson = AdaptivePoisson::new(small_poisson_config(1), SerialComm);
    assert!(poisson.system().is_none());
    assert!(poisson.assemble_system().is_err());
    assert!(poisson.solve().is_err());
    assert!(poisson.estimate_error().is_err());
}

#[test]
fn boundary_values_are_exactly_zero() {
    let mut poisson = AdaptivePoisson::new(small_poisson_config(1), SerialComm);
    let summaries = poisson.run().unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].n_active_cells, 64);

    let system = poisson.system().unwrap();
    let solution = &system.locally_relevant_solution;
    for dof in system.dofs.boundary_dofs().iter() {
        assert_eq!(solution.get(dof), 0.0);
    }
    // The interior is not trivially zero
    assert!(solution.as_slice().iter().any(|u| u.abs() > 1e-3));
}

#[test]
fn constant_source_matches_reference_value_at_center() {
    let config = PoissonConfig {
        initial_refinement: 4,
        source: constant_source(1.0),
        ..small_poisson_config(1)
    };
    let mut poisson = AdaptivePoisson::new(config, SerialComm);
    poisson.run().unwrap();

    let system = poisson.system().unwrap();
    let center = system
        .dofs
        .support_points()
        .iter()
        .position(|&[x, y]| (x - 0.5).abs() < 1e-12 && (y - 0.5).abs() < 1e-12)
        .expect("The center is a support point");
    // Series solution of -Δu = 1 on the unit square
    assert_scalar_eq!(
        system.locally_relevant_solution.get(center),
        0.0736713532,
        comp = abs,
        tol = 1e-5
    );
}

#[test]
fn thread_ranks_reproduce_serial_run() {
    let config = small_poisson_config(1);
    let mut serial = AdaptivePoisson::new(config.clone(), SerialComm);
    let serial_summaries = serial.run().unwrap();
    let serial_system = serial.system().unwrap();

    let results = run_on_thread_ranks(2, |comm| {
        let rank = comm.rank();
        let mut poisson = AdaptivePoisson::new(config.clone(), comm);
        let summaries = poisson.run().unwrap();
        let system = poisson.system().unwrap();
        let relevant: Vec<(usize, f64)> = system
            .locally_relevant_dofs
            .iter()
            .map(|dof| (dof, system.locally_relevant_solution.get(dof)))
            .collect();
        (rank, summaries, system.locally_owned_dofs.n_elements(), relevant)
    });

    let mut n_owned_total = 0;
    for (rank, summaries, n_owned, relevant) in results {
        let summary: &CycleSummary = &summaries[0];
        assert_eq!(summary.n_active_cells, serial_summaries[0].n_active_cells);
        assert_eq!(summary.n_dofs, serial_summaries[0].n_dofs);
        assert_scalar_eq!(
            summary.estimated_error,
            serial_summaries[0].estimated_error,
            comp = abs,
            tol = 1e-8
        );

        assert!(!relevant.is_empty(), "Rank {} has no relevant DoFs", rank);
        for (dof, value) in relevant {
            let expected = serial_system.locally_relevant_solution.get(dof);
            assert_scalar_eq!(value, expected, comp = abs, tol = 1e-8);
        }
        n_owned_total += n_owned;
    }
    assert_eq!(n_owned_total, serial_summaries[0].n_dofs);
}

#[test]
fn adaptive_cycles_refine_the_mesh() {
    let mut poisson = AdaptivePoisson::new(small_poisson_config(3), SerialComm);
    let summaries = poisson.run().unwrap();

    assert_eq!(summaries.len(), 3);
    for (cycle, summary) in summaries.iter().enumerate() {
        assert_eq!(summary.cycle, cycle);
        assert!(summary.solver_iterations > 0);
        assert!(summary.estimated_error.is_finite() && summary.estimated_error > 0.0);
    }
    for pair in summaries.windows(2) {
        assert!(pair[1].n_active_cells > pair[0].n_active_cells);
        assert!(pair[1].n_dofs > pair[0].n_dofs);
    }

    let tria = poisson.triangulation();
    assert!(tria.is_balanced());
    assert_eq!(tria.n_active_cells(), summaries[2].n_active_cells);
    let max_level = tria.active_cells().iter().map(|cell| cell.level).max().unwrap();
    assert!(max_level > 3);
}

#[test]
fn iteration_limit_makes_run_fail() {
    let config = PoissonConfig {
        max_iterations: Some(1),
        ..small_poisson_config(1)
    };
    let mut poisson = AdaptivePoisson::new(config, SerialComm);
    assert!(poisson.run().is_err());
}

#[test]
fn plain_aggregation_backend_solves_as_well() {
    let config = small_poisson_config(1);
    let smoothed = AdaptivePoisson::new(config.clone(), SerialComm).run().unwrap();

    let plain_config = PoissonConfig {
        backend: visco_fem::la::BackendKind::PlainAggregation,
        ..config
    };
    let plain = AdaptivePoisson::new(plain_config, SerialComm).run().unwrap();
    assert_eq!(plain[0].n_dofs, smoothed[0].n_dofs);
    assert_scalar_eq!(plain[0].estimated_error, smoothed[0].estimated_error, comp = abs, tol = 1e-8);
}
