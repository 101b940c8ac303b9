use crate::run_on_thread_ranks;
use matrixcompare::assert_scalar_eq;
use visco_fem::assembly::FeValues;
use visco_fem::comm::{Communicator, SerialComm};
use visco_fem::config::ProblemData;
use visco_fem::constraints::{interpolate_boundary_values, make_hanging_node_constraints, AffineConstraints};
use visco_fem::dofs::DofHandler;
use visco_fem::fe::FeQ;
use visco_fem::la::{DistributedVector, GhostedVector};
use visco_fem::matrix_free::{MatrixFree, MatrixFreeError};
use visco_fem::mesh::Triangulation;
use visco_fem::quadrature::gauss_lobatto_2d;
use visco_fem::stress::{
    ConstantInvViscosity, InvViscosity, LayeredInvViscosity, Solution, StressContext, StressError, StressKernel,
    StressOperator,
};

/// Mesh, DoFs and matrix-free data of a uniformly refined mesh on one rank.
struct Setup {
    tria: Triangulation,
    dofs: DofHandler,
    data: MatrixFree,
}

fn uniform_setup(n_subdomains: usize, rank: usize, refinements: usize, degree: usize) -> Setup {
    let mut tria = Triangulation::hyper_cube(n_subdomains);
    tria.refine_global(refinements);
    let dofs = DofHandler::distribute_dofs(&tria, &FeQ::new(degree));
    let mut constraints = AffineConstraints::new();
    interpolate_boundary_values(&dofs, 0.0, &mut constraints);
    constraints.close();
    let data = MatrixFree::reinit(&tria, &dofs, &constraints, rank).unwrap();
    Setup { tria, dofs, data }
}

/// Nodal interpolant of `f`, valid on the locally relevant DoFs. Collective.
fn interpolate(setup: &Setup, comm: &dyn Communicator, f: impl Fn(&[f64; 2]) -> f64) -> GhostedVector {
    let data = &setup.data;
    let mut v = DistributedVector::zeros(data.n_dofs(), data.owned_dofs());
    for i in data.owned_dofs() {
        v.as_mut_slice()[i] = f(&setup.dofs.support_point(i));
    }
    v.to_ghosted(data.relevant_dofs(), comm)
}

fn owned_dst(setup: &Setup) -> DistributedVector {
    DistributedVector::zeros(setup.data.n_dofs(), setup.data.owned_dofs())
}

const UNIT_PROBLEM: ProblemData = ProblemData { shear_modulus: 1.0 };

#[test]
fn gauss_lobatto_mass_matrix_is_diagonal() {
    for degree in 1..=3 {
        let setup = uniform_setup(1, 0, 2, degree);
        let fe = setup.dofs.fe();
        let mut fe_values = FeValues::new(fe, gauss_lobatto_2d(degree + 1));
        fe_values.reinit(&setup.tria.cell(5));
        for i in 0..fe.dofs_per_cell() {
            for j in (0..fe.dofs_per_cell()).filter(|&j| j != i) {
                let m_ij: f64 = (0..fe_values.n_quadrature_points())
                    .map(|q| fe_values.shape_value(i, q) * fe_values.shape_value(j, q) * fe_values.jxw(q))
                    .sum();
                assert_scalar_eq!(m_ij, 0.0, comp = abs, tol = 1e-15);
            }
        }

        // The shape functions sum to one, so the lumped masses sum to the area
        let diagonal = setup.data.local_mass_diagonal();
        assert_scalar_eq!(diagonal.iter().sum::<f64>(), 1.0, comp = abs, tol = 1e-13);
        assert!(diagonal.iter().all(|&m| m > 0.0));

        let comm = SerialComm;
        let inv_visc = ConstantInvViscosity { value: 0.0 };
        let ctx = StressContext {
            data: &setup.data,
            problem: &UNIT_PROBLEM,
            inv_visc: &inv_visc,
            comm: &comm,
        };
        let op = StressOperator::initialized(StressKernel::Tentative, 0.1, &ctx);
        let inv_mass = op.inv_mass_matrix().unwrap();
        for (m, inv_m) in diagonal.iter().zip(inv_mass.as_slice()) {
            assert_scalar_eq!(m * inv_m, 1.0, comp = abs, tol = 1e-14);
        }
    }
}

#[test]
fn reinit_rejects_hanging_nodes_and_outdated_dofs() {
    let mut tria = Triangulation::hyper_cube(1);
    tria.refine_global(2);
    tria.set_refine_flag(3);
    tria.execute_coarsening_and_refinement();

    let dofs = DofHandler::distribute_dofs(&tria, &FeQ::new(2));
    let mut constraints = AffineConstraints::new();
    make_hanging_node_constraints(&tria, &dofs, &mut constraints);
    constraints.close();
    let result = MatrixFree::reinit(&tria, &dofs, &constraints, 0);
    assert_eq!(result.err(), Some(MatrixFreeError::HangingNodeConstraints));

    let dof_generation = dofs.generation();
    tria.refine_global(1);
    let result = MatrixFree::reinit(&tria, &dofs, &AffineConstraints::new(), 0);
    assert_eq!(
        result.err(),
        Some(MatrixFreeError::OutdatedDofs {
            mesh_generation: tria.generation(),
            dof_generation,
        })
    );
}

#[test]
fn cells_of_a_color_share_no_dofs() {
    let setup = uniform_setup(1, 0, 3, 2);
    assert_eq!(setup.data.n_cells(), 64);
    // Every interior vertex touches four cells
    assert!(setup.data.n_colors() >= 4);
}

#[test]
fn zero_time_step_gives_zero_increment() {
    let comm = SerialComm;
    let inv_visc = ConstantInvViscosity { value: 2.0 };
    for refinements in [0, 2] {
        let setup = uniform_setup(1, 0, refinements, 2);
        let ctx = StressContext {
            data: &setup.data,
            problem: &UNIT_PROBLEM,
            inv_visc: &inv_visc,
            comm: &comm,
        };
        let sigma = interpolate(&setup, &comm, |&[x, y]| (3.0 * x).sin() + x * y);
        let mut soln = Solution::zeros(&setup.data);
        soln.velocity = interpolate(&setup, &comm, |&[x, y]| x * x - y);

        let op = StressOperator::initialized(StressKernel::Tentative, 0.0, &ctx);
        let mut dst = owned_dst(&setup);
        op.apply(&ctx, &mut dst, &sigma, &soln, 0).unwrap();
        assert!(dst.owned_values().iter().all(|&value| value == 0.0));
    }
}

#[test]
fn tentative_update_of_linear_velocity() {
    let comm = SerialComm;
    let setup = uniform_setup(1, 0, 2, 2);
    let inv_visc = ConstantInvViscosity { value: 0.0 };
    let problem = ProblemData::default();
    let ctx = StressContext {
        data: &setup.data,
        problem: &problem,
        inv_visc: &inv_visc,
        comm: &comm,
    };

    let (a, b) = (0.75, -1.25);
    let mut soln = Solution::zeros(&setup.data);
    soln.velocity = interpolate(&setup, &comm, |&[x, y]| a * x + b * y);
    let dt = 1.0e-10;
    let scale = dt * problem.shear_modulus;
    let op = StressOperator::initialized(StressKernel::Tentative, dt, &ctx);

    for (comp, slope) in [(0, a), (1, b)] {
        let sigma = soln.stress[comp].clone();
        let mut dst = owned_dst(&setup);
        op.apply(&ctx, &mut dst, &sigma, &soln, comp).unwrap();
        for &value in dst.owned_values() {
            assert_scalar_eq!(value, scale * slope, comp = abs, tol = 1e-11);
        }
    }
}

#[test]
fn tentative_update_relaxes_stress() {
    let comm = SerialComm;
    let setup = uniform_setup(1, 0, 2, 2);
    let inv_visc = LayeredInvViscosity {
        interface: 0.5,
        lower: 4.0,
        upper: 0.0,
    };
    let ctx = StressContext {
        data: &setup.data,
        problem: &UNIT_PROBLEM,
        inv_visc: &inv_visc,
        comm: &comm,
    };

    let s = 2.0;
    let dt = 0.1;
    let soln = Solution::zeros(&setup.data);
    let sigma = interpolate(&setup, &comm, |_| s);
    let op = StressOperator::initialized(StressKernel::Tentative, dt, &ctx);
    let mut dst = owned_dst(&setup);
    op.apply(&ctx, &mut dst, &sigma, &soln, 1).unwrap();

    for i in setup.data.owned_dofs() {
        let point = setup.dofs.support_point(i);
        let expected = -dt * inv_visc.value(&point) * s;
        assert_scalar_eq!(dst.as_slice()[i], expected, comp = abs, tol = 1e-13);
    }
}

#[test]
fn correction_uses_velocity_increment() {
    let comm = SerialComm;
    let setup = uniform_setup(1, 0, 2, 3);
    // Neither viscosity nor stress enter the correction
    let inv_visc = ConstantInvViscosity { value: 1.0e3 };
    let ctx = StressContext {
        data: &setup.data,
        problem: &UNIT_PROBLEM,
        inv_visc: &inv_visc,
        comm: &comm,
    };

    let s = -0.5;
    let dt = 0.25;
    let mut soln = Solution::zeros(&setup.data);
    soln.velocity = interpolate(&setup, &comm, |&[x, y]| 2.0 * x + 3.0 * y);
    soln.old_velocity = interpolate(&setup, &comm, |&[x, y]| 1.5 * x - y + 7.0);
    soln.stress[0] = interpolate(&setup, &comm, |_| s);
    soln.stress[1] = interpolate(&setup, &comm, |_| s);
    let op = StressOperator::initialized(StressKernel::Correction, dt, &ctx);
    assert_eq!(op.kernel(), StressKernel::Correction);

    for (comp, increment) in [(0, 0.5), (1, 4.0)] {
        let mut dst = owned_dst(&setup);
        op.apply(&ctx, &mut dst, &soln.stress[comp], &soln, comp).unwrap();
        for &value in dst.owned_values() {
            assert_scalar_eq!(value, dt * increment, comp = abs, tol = 1e-11);
        }
    }
}

#[test]
fn apply_is_deterministic() {
    let comm = SerialComm;
    let setup = uniform_setup(1, 0, 4, 2);
    let inv_visc = LayeredInvViscosity {
        interface: 0.3,
        lower: 1.0,
        upper: 0.0,
    };
    let ctx = StressContext {
        data: &setup.data,
        problem: &UNIT_PROBLEM,
        inv_visc: &inv_visc,
        comm: &comm,
    };
    let mut soln = Solution::zeros(&setup.data);
    soln.velocity = interpolate(&setup, &comm, |&[x, y]| (5.0 * x).sin() * (3.0 * y).cos());
    let sigma = interpolate(&setup, &comm, |&[x, y]| x - y * y);
    let op = StressOperator::initialized(StressKernel::Tentative, 0.01, &ctx);

    let mut first = owned_dst(&setup);
    op.apply(&ctx, &mut first, &sigma, &soln, 0).unwrap();
    for _ in 0..5 {
        let mut again = owned_dst(&setup);
        op.apply(&ctx, &mut again, &sigma, &soln, 0).unwrap();
        assert_eq!(again.as_slice(), first.as_slice());
    }
}

#[test]
fn invalid_use_is_reported() {
    let comm = SerialComm;
    let setup = uniform_setup(1, 0, 1, 2);
    let inv_visc = ConstantInvViscosity { value: 1.0 };
    let ctx = StressContext {
        data: &setup.data,
        problem: &UNIT_PROBLEM,
        inv_visc: &inv_visc,
        comm: &comm,
    };
    let soln = Solution::zeros(&setup.data);
    let sigma = soln.stress[0].clone();
    let mut dst = owned_dst(&setup);

    let mut op = StressOperator::new(StressKernel::Tentative, 0.1);
    assert!(!op.is_ready_for(&setup.data));
    assert!(op.inv_mass_matrix().is_none());
    assert_eq!(op.apply(&ctx, &mut dst, &sigma, &soln, 0), Err(StressError::NotInitialized));

    op.init(&ctx);
    assert!(op.is_ready_for(&setup.data));
    assert_eq!(
        op.apply(&ctx, &mut dst, &sigma, &soln, 2),
        Err(StressError::InvalidComponent { comp: 2 })
    );

    let mut short = DistributedVector::zeros(3, 0..3);
    assert_eq!(
        op.apply(&ctx, &mut short, &sigma, &soln, 0),
        Err(StressError::VectorSizeMismatch {
            expected: setup.data.n_dofs(),
            actual: 3
        })
    );

    // After the mesh changes the cached mass matrix is stale
    let refined = uniform_setup(1, 0, 2, 2);
    let refined_ctx = StressContext {
        data: &refined.data,
        ..ctx
    };
    let refined_soln = Solution::zeros(&refined.data);
    let mut refined_dst = owned_dst(&refined);
    let result = op.apply(
        &refined_ctx,
        &mut refined_dst,
        &refined_soln.stress[0],
        &refined_soln,
        0,
    );
    assert!(matches!(result, Err(StressError::LayoutMismatch { .. })));
    assert!(!op.is_ready_for(&refined.data));

    op.invalidate();
    assert!(op.inv_mass_matrix().is_none());
    op.init(&refined_ctx);
    op.set_time_step(0.2);
    assert_eq!(op.time_step(), 0.2);
    assert!(op
        .apply(&refined_ctx, &mut refined_dst, &refined_soln.stress[0], &refined_soln, 1)
        .is_ok());
}

#[test]
fn thread_ranks_reproduce_serial_apply() {
    let velocity = |&[x, y]: &[f64; 2]| (2.0 * x).cos() + x * y * y;
    let old_velocity = |&[x, y]: &[f64; 2]| x - 0.5 * y;
    let stress = |&[x, y]: &[f64; 2]| x * x + (4.0 * y).sin();
    let inv_visc = LayeredInvViscosity {
        interface: 0.6,
        lower: 2.0,
        upper: 0.0,
    };

    let run = |setup: &Setup, comm: &dyn Communicator| -> Vec<Vec<f64>> {
        let ctx = StressContext {
            data: &setup.data,
            problem: &UNIT_PROBLEM,
            inv_visc: &inv_visc,
            comm,
        };
        let mut soln = Solution::zeros(&setup.data);
        soln.velocity = interpolate(setup, comm, velocity);
        soln.old_velocity = interpolate(setup, comm, old_velocity);
        let sigma = interpolate(setup, comm, stress);

        [StressKernel::Tentative, StressKernel::Correction]
            .into_iter()
            .map(|kernel| {
                let op = StressOperator::initialized(kernel, 0.05, &ctx);
                let mut dst = owned_dst(setup);
                op.apply(&ctx, &mut dst, &sigma, &soln, 1).unwrap();
                dst.gather(comm)
            })
            .collect()
    };

    let serial = run(&uniform_setup(1, 0, 3, 2), &SerialComm);
    let parallel = run_on_thread_ranks(2, |comm| {
        let setup = uniform_setup(comm.size(), comm.rank(), 3, 2);
        run(&setup, &comm)
    });

    for results in parallel {
        for (kernel_result, serial_result) in results.iter().zip(&serial) {
            assert_eq!(kernel_result.len(), serial_result.len());
            for (value, expected) in kernel_result.iter().zip(serial_result) {
                assert_scalar_eq!(*value, *expected, comp = abs, tol = 1e-12);
            }
        }
    }
}
