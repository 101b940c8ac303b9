use visco_fem::mesh::{CellId, FaceNeighbor, Triangulation};

fn assert_face_neighbors_symmetric(tria: &Triangulation) {
    for i in 0..tria.n_active_cells() {
        for j in tria.face_neighbor_indices(i) {
            assert!(
                tria.face_neighbor_indices(j).any(|k| k == i),
                "Cell {} is a neighbour of {}, but not vice versa",
                j,
                i
            );
        }
    }
}

#[test]
fn global_refinement_gives_uniform_mesh() {
    let mut tria = Triangulation::hyper_cube(1);
    assert_eq!(tria.n_active_cells(), 1);
    let generation = tria.generation();

    tria.refine_global(3);
    assert_eq!(tria.n_active_cells(), 64);
    assert_eq!(tria.generation(), generation + 3);
    assert!(tria.is_balanced());
    assert!(tria.active_cells().iter().all(|cell| cell.level == 3));
    assert_eq!(tria.cell(0), CellId::new(3, 0, 0));
    assert_eq!(tria.cell(63), CellId::new(3, 7, 7));

    let total_area: f64 = tria.active_cells().iter().map(|cell| cell.h() * cell.h()).sum();
    assert!((total_area - 1.0).abs() < 1e-14);
}

#[test]
fn repeated_corner_refinement_stays_balanced() {
    let mut tria = Triangulation::hyper_cube(1);
    tria.refine_global(1);
    for _ in 0..5 {
        // Morton order puts the lower-left corner cell first
        tria.set_refine_flag(0);
        tria.execute_coarsening_and_refinement();
        assert!(tria.is_balanced());
        assert_face_neighbors_symmetric(&tria);
    }
    assert_eq!(tria.cell(0), CellId::new(6, 0, 0));

    let total_area: f64 = tria.active_cells().iter().map(|cell| cell.h() * cell.h()).sum();
    assert!((total_area - 1.0).abs() < 1e-14);
}

#[test]
fn face_neighbors_across_refinement_levels() {
    let mut tria = Triangulation::hyper_cube(1);
    tria.refine_global(1);
    tria.set_refine_flag(0);
    tria.execute_coarsening_and_refinement();

    // The children of the lower-left cell come first, followed by the three level 1 cells
    let fine = tria.find_active(&CellId::new(2, 1, 0)).unwrap();
    let coarse = tria.find_active(&CellId::new(1, 1, 0)).unwrap();
    assert_eq!(tria.face_neighbors(fine, 1), FaceNeighbor::Coarser(coarse));
    assert_eq!(tria.face_neighbors(fine, 2), FaceNeighbor::Boundary);

    let lower_fine = tria.find_active(&CellId::new(2, 1, 0)).unwrap();
    let upper_fine = tria.find_active(&CellId::new(2, 1, 1)).unwrap();
    assert_eq!(tria.face_neighbors(coarse, 0), FaceNeighbor::Finer([lower_fine, upper_fine]));
}

#[test]
fn complete_sibling_groups_are_coarsened() {
    let mut tria = Triangulation::hyper_cube(1);
    tria.refine_global(2);
    for i in 0..4 {
        tria.set_coarsen_flag(i);
    }
    tria.execute_coarsening_and_refinement();

    assert_eq!(tria.n_active_cells(), 13);
    assert_eq!(tria.cell(0), CellId::new(1, 0, 0));
    assert!(tria.is_balanced());
}

#[test]
fn incomplete_sibling_groups_are_not_coarsened() {
    let mut tria = Triangulation::hyper_cube(1);
    tria.refine_global(2);
    for i in 0..3 {
        tria.set_coarsen_flag(i);
    }
    let generation = tria.generation();
    tria.execute_coarsening_and_refinement();

    assert_eq!(tria.n_active_cells(), 16);
    assert_eq!(tria.cell(0), CellId::new(2, 0, 0));
    assert!(tria.generation() > generation);
}

#[test]
fn coarsening_is_blocked_by_balance() {
    let mut tria = Triangulation::hyper_cube(1);
    tria.refine_global(2);
    // Refine the level 2 cell just left of the children of (1, 1, 0)
    let left = tria.find_active(&CellId::new(2, 1, 0)).unwrap();
    tria.set_refine_flag(left);
    tria.execute_coarsening_and_refinement();
    assert!(tria.is_balanced());

    for child in CellId::new(1, 1, 0).children() {
        let index = tria.find_active(&child).unwrap();
        tria.set_coarsen_flag(index);
    }
    tria.execute_coarsening_and_refinement();

    // A level 1 cell next to level 3 cells would violate 2:1 balance
    assert!(tria.find_active(&CellId::new(1, 1, 0)).is_none());
    for child in CellId::new(1, 1, 0).children() {
        assert!(tria.find_active(&child).is_some());
    }
    assert!(tria.is_balanced());
}

#[test]
fn owned_cell_ranges_are_contiguous_and_complete() {
    let mut tria = Triangulation::hyper_cube(3);
    tria.refine_global(2);
    tria.set_refine_flag(5);
    tria.execute_coarsening_and_refinement();

    let mut next = 0;
    for rank in 0..3 {
        let range = tria.locally_owned_cells(rank);
        assert_eq!(range.start, next);
        assert!(!range.is_empty());
        next = range.end;
    }
    assert_eq!(next, tria.n_active_cells());
}
