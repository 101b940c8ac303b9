//! VTK XML export of finite element solutions.
//!
//! Every rank writes the cells it owns into its own `.vtu` piece, and rank 0 writes a `.pvtu`
//! index that references all pieces. A cell of degree `p` is written as `p × p` bilinear
//! quadrilaterals through its support points.
use crate::dofs::DofHandler;
use crate::la::GhostedVector;
use crate::mesh::Triangulation;
use eyre::{eyre, WrapErr};
use itertools::iproduct;
use std::fs;
use std::path::{Path, PathBuf};
use vtkio::model::{
    ArrayMetaData, Attribute, Attributes, AttributesMetaData, ByteOrder, CellType, Cells, DataArray, DataSet,
    ElementType, IOBuffer, MetaData, Piece, ScalarType, UnstructuredGridPiece, Version, VertexNumbers, Vtk,
};

pub fn piece_file_name(cycle: usize, rank: usize) -> String {
    format!("solution-{:02}.{:04}.vtu", cycle, rank)
}

pub fn record_file_name(cycle: usize) -> String {
    format!("solution-{:02}.pvtu", cycle)
}

fn scalar_attribute(name: &str, data: Vec<f64>) -> Attribute {
    Attribute::DataArray(DataArray {
        name: name.to_string(),
        elem: ElementType::Scalars {
            num_comp: 1,
            lookup_table: None,
        },
        data: IOBuffer::F64(data),
    })
}

/// Builds the data set of the cells owned by one rank.
pub struct SolutionDataSetBuilder<'a> {
    tria: &'a Triangulation,
    dofs: &'a DofHandler,
    solution: &'a GhostedVector,
    rank: usize,
    // Only used for exporting directly to file
    title: Option<String>,
}

impl<'a> SolutionDataSetBuilder<'a> {
    pub fn from_solution(
        tria: &'a Triangulation,
        dofs: &'a DofHandler,
        solution: &'a GhostedVector,
        rank: usize,
    ) -> Self {
        Self {
            tria,
            dofs,
            solution,
            rank,
            title: None,
        }
    }

    pub fn with_title(self, title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..self
        }
    }

    pub fn build(&self) -> DataSet {
        assert_eq!(self.tria.generation(), self.dofs.generation(), "DoF numbering is out of date");
        let fe = self.dofs.fe();
        let p = fe.degree();
        let n_local = fe.dofs_per_cell();
        let owned_cells = self.tria.locally_owned_cells(self.rank);

        let mut points = Vec::with_capacity(3 * n_local * owned_cells.len());
        let mut values = Vec::with_capacity(n_local * owned_cells.len());
        let mut connectivity = Vec::new();
        let mut offsets = Vec::new();
        let mut n_patches = 0;

        for cell_index in owned_cells {
            let cell = self.tria.cell(cell_index);
            let [x0, y0] = cell.origin();
            let h = cell.h();
            let first_point = (points.len() / 3) as u64;
            for (local, &dof) in self.dofs.cell_dofs(cell_index).iter().enumerate() {
                let [xi, eta] = fe.support_point(local);
                points.extend_from_slice(&[x0 + h * xi, y0 + h * eta, 0.0]);
                values.push(self.solution.get(dof));
            }

            for (b, a) in iproduct!(0..p, 0..p) {
                let corners = [
                    fe.local_index(a, b),
                    fe.local_index(a + 1, b),
                    fe.local_index(a + 1, b + 1),
                    fe.local_index(a, b + 1),
                ];
                connectivity.extend(corners.iter().map(|&i| first_point + i as u64));
                offsets.push(connectivity.len() as u64);
                n_patches += 1;
            }
        }

        let piece = UnstructuredGridPiece {
            points: points.into(),
            cells: Cells {
                cell_verts: VertexNumbers::XML { connectivity, offsets },
                types: vec![CellType::Quad; n_patches],
            },
            data: Attributes {
                point: vec![scalar_attribute("u", values)],
                cell: vec![scalar_attribute("subdomain", vec![self.rank as f64; n_patches])],
            },
        };

        DataSet::UnstructuredGrid {
            meta: None,
            pieces: vec![Piece::Inline(Box::new(piece))],
        }
    }

    /// Convenience function for directly exporting the dataset to a `.vtu` file.
    pub fn try_export(&self, filename: impl AsRef<Path>) -> eyre::Result<()> {
        let filepath = filename.as_ref();
        let fallback_title = filepath
            .file_stem()
            .map(|os_str| os_str.to_string_lossy().to_string())
            .unwrap_or_else(|| "untitled".to_string());
        if let Some(parent) = filepath.parent() {
            fs::create_dir_all(parent).wrap_err_with(|| format!("Failed to create directory {}", parent.display()))?;
        }
        Vtk {
            version: Version { major: 1, minor: 0 },
            title: self.title.clone().unwrap_or(fallback_title),
            byte_order: ByteOrder::LittleEndian,
            data: self.build(),
            file_path: None,
        }
        .export(filepath)
        .map_err(|err| eyre!("Failed to write {}: {}", filepath.display(), err))
    }
}

/// Writes the `.pvtu` index referencing the pieces of all ranks.
pub fn write_pvtu_record(directory: &Path, cycle: usize, n_ranks: usize) -> eyre::Result<PathBuf> {
    let scalar_meta = |name: &str| ArrayMetaData {
        name: name.to_string(),
        elem: ElementType::Scalars {
            num_comp: 1,
            lookup_table: None,
        },
        scalar_type: ScalarType::F64,
    };
    let meta = MetaData::UnstructuredGrid {
        ghost_level: 0,
        points_type: ScalarType::F64,
        attributes: AttributesMetaData {
            point_data: vec![scalar_meta("u")],
            cell_data: vec![scalar_meta("subdomain")],
        },
    };
    let pieces = (0..n_ranks)
        .map(|rank| Piece::Source(piece_file_name(cycle, rank), None))
        .collect();

    let path = directory.join(record_file_name(cycle));
    Vtk {
        version: Version { major: 1, minor: 0 },
        title: format!("solution-{:02}", cycle),
        byte_order: ByteOrder::LittleEndian,
        data: DataSet::UnstructuredGrid {
            meta: Some(Box::new(meta)),
            pieces,
        },
        file_path: None,
    }
    .export(&path)
    .map_err(|err| eyre!("Failed to write {}: {}", path.display(), err))?;
    Ok(path)
}
