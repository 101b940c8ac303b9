use crate::{export_solution_vtk, run_on_thread_ranks, small_poisson_config};
use std::fs;
use std::path::PathBuf;
use visco_fem::comm::SerialComm;
use visco_fem::config::{OutputConfig, PoissonConfig};
use visco_fem::io::vtk::{piece_file_name, record_file_name, write_pvtu_record};
use visco_fem::poisson::AdaptivePoisson;
use vtkio::model::{DataSet, MetaData, Piece};
use vtkio::Vtk;

fn output_config(test_name: &str, max_processes: usize) -> PoissonConfig {
    let directory = PathBuf::from("data/unit_tests").join(test_name);
    // Stale files from earlier runs would hide missing output
    let _ = fs::remove_dir_all(&directory);
    PoissonConfig {
        output: OutputConfig {
            enabled: true,
            directory,
            max_processes,
        },
        ..small_poisson_config(1)
    }
}

#[test]
fn file_names_encode_cycle_and_rank() {
    assert_eq!(piece_file_name(3, 1), "solution-03.0001.vtu");
    assert_eq!(record_file_name(12), "solution-12.pvtu");
}

#[test]
fn pvtu_record_references_all_pieces() {
    let directory = PathBuf::from("data/unit_tests/pvtu_record_references_all_pieces");
    fs::create_dir_all(&directory).unwrap();
    let path = write_pvtu_record(&directory, 4, 3).unwrap();
    assert_eq!(path, directory.join("solution-04.pvtu"));

    let record = Vtk::import(&path).unwrap();
    match record.data {
        DataSet::UnstructuredGrid { meta, pieces } => {
            match meta.as_deref() {
                Some(MetaData::UnstructuredGrid {
                    ghost_level, attributes, ..
                }) => {
                    assert_eq!(*ghost_level, 0);
                    let point_names: Vec<_> = attributes.point_data.iter().map(|a| a.name.as_str()).collect();
                    let cell_names: Vec<_> = attributes.cell_data.iter().map(|a| a.name.as_str()).collect();
                    assert_eq!(point_names, vec!["u"]);
                    assert_eq!(cell_names, vec!["subdomain"]);
                }
                other => panic!("Unexpected meta data: {:?}", other),
            }
            let sources: Vec<String> = pieces
                .iter()
                .map(|piece| match piece {
                    Piece::Source(source, _) => source.clone(),
                    _ => panic!("Expected pieces to reference source files"),
                })
                .collect();
            let expected: Vec<String> = (0..3).map(|rank| piece_file_name(4, rank)).collect();
            assert_eq!(sources, expected);
        }
        _ => panic!("Expected a parallel unstructured grid"),
    }
}

#[test]
fn serial_run_writes_piece_and_record() {
    let config = output_config("serial_run_writes_piece_and_record", 32);
    let directory = config.output.directory.clone();
    let mut poisson = AdaptivePoisson::new(config, SerialComm);
    poisson.run().unwrap();

    assert!(directory.join("solution-00.0000.vtu").is_file());
    assert!(directory.join("solution-00.pvtu").is_file());

    let system = poisson.system().unwrap();
    export_solution_vtk(
        "serial_run_writes_piece_and_record",
        "exported",
        poisson.triangulation(),
        &system.dofs,
        &system.locally_relevant_solution,
    );
    assert!(directory.join("exported.vtu").is_file());
}

#[test]
fn every_rank_writes_its_piece() {
    let config = output_config("every_rank_writes_its_piece", 32);
    let directory = config.output.directory.clone();
    run_on_thread_ranks(2, |comm| {
        AdaptivePoisson::new(config.clone(), comm).run().unwrap();
    });

    for rank in 0..2 {
        assert!(directory.join(piece_file_name(0, rank)).is_file());
    }
    assert!(directory.join(record_file_name(0)).is_file());
}

#[test]
fn output_is_skipped_on_too_many_ranks() {
    let config = output_config("output_is_skipped_on_too_many_ranks", 1);
    let directory = config.output.directory.clone();
    run_on_thread_ranks(2, |comm| {
        AdaptivePoisson::new(config.clone(), comm).run().unwrap();
    });
    assert!(!directory.join(record_file_name(0)).exists());
}
