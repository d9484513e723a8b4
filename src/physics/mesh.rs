//! Mesh adapter, explicit parent mesh and compartment sub-meshes
//!
//! # Parent mesh
//!
//! Every compartment lives on one parent mesh of topological dimension `D`.
//! Cells carry the markers of `D`-dimensional compartments (volumes) and
//! facets carry the markers of `(D-1)`-dimensional compartments (surfaces).
//! The [`MeshAdapter`] trait is the only view the rest of the crate has of
//! the mesh, so any mesh library can be plugged in behind it.
//!
//! [`ParentMesh`] is an explicit implementation holding vertices, cells and
//! facets with precomputed measures and centroids; [`BoxMeshBuilder`] fills
//! one with a structured hexahedral grid.
//!
//! # Marker convention of [`BoxMeshBuilder`]
//!
//! ```text
//! cells            marker returned by the cell-marker function (default 1)
//! boundary facets  10 × marker of the adjacent cell
//! interface facets 12 (two adjacent cells with different markers)
//! interior facets  0
//! ```
//!
//! # Sub-meshes
//!
//! [`SubMesh::extract`] selects the entities of one compartment and builds
//! what the finite-volume assembly needs: local measures, centroids and the
//! two-point connections used for diffusion. Cells connect through shared
//! facets; facets connect through shared ridges (edges of a 3D mesh,
//! vertices of a 2D mesh).

use crate::error::{Result, SmartError};
use crate::models::Compartment;
use std::collections::{BTreeMap, HashMap};

/// Point in space; unused coordinates are zero
pub type Point = [f64; 3];

fn distance(a: &Point, b: &Point) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}

fn midpoint(points: &[Point]) -> Point {
    let n = points.len().max(1) as f64;
    let mut m = [0.0; 3];
    for p in points {
        for (mi, pi) in m.iter_mut().zip(p.iter()) {
            *mi += pi / n;
        }
    }
    m
}

// =================================================================================================
// Adapter trait
// =================================================================================================

/// Read-only view of a marker-tagged parent mesh
pub trait MeshAdapter: Send + Sync {
    /// Dimension of the cells
    fn topological_dimension(&self) -> usize;

    fn num_vertices(&self) -> usize;
    fn vertex(&self, vertex: usize) -> Point;

    fn num_cells(&self) -> usize;
    fn cell_marker(&self, cell: usize) -> i32;
    /// Length, area or volume of the cell
    fn cell_measure(&self, cell: usize) -> f64;
    fn cell_centroid(&self, cell: usize) -> Point;

    fn num_facets(&self) -> usize;
    fn facet_marker(&self, facet: usize) -> i32;
    fn facet_measure(&self, facet: usize) -> f64;
    fn facet_centroid(&self, facet: usize) -> Point;
    /// Vertices in cyclic order
    fn facet_vertices(&self, facet: usize) -> &[usize];
    /// One cell on the boundary, two inside
    fn facet_cells(&self, facet: usize) -> &[usize];
}

// =================================================================================================
// Explicit parent mesh
// =================================================================================================

/// Cell of a [`ParentMesh`]
#[derive(Debug, Clone, PartialEq)]
pub struct MeshCell {
    pub vertices: Vec<usize>,
    pub marker: i32,
    pub measure: f64,
    pub centroid: Point,
}

/// Facet of a [`ParentMesh`]
#[derive(Debug, Clone, PartialEq)]
pub struct MeshFacet {
    /// Vertices in cyclic order
    pub vertices: Vec<usize>,
    /// Adjacent cells (one or two)
    pub cells: Vec<usize>,
    pub marker: i32,
    pub measure: f64,
    pub centroid: Point,
}

/// Explicit marker-tagged mesh
#[derive(Debug, Clone, PartialEq)]
pub struct ParentMesh {
    dimension: usize,
    vertices: Vec<Point>,
    cells: Vec<MeshCell>,
    facets: Vec<MeshFacet>,
}

impl ParentMesh {
    /// Checked construction
    pub fn new(dimension: usize, vertices: Vec<Point>, cells: Vec<MeshCell>, facets: Vec<MeshFacet>) -> Result<Self> {
        if !(1..=3).contains(&dimension) {
            return Err(SmartError::configuration(format!(
                "mesh dimension must be 1, 2 or 3, got {}",
                dimension
            )));
        }

        for (i, cell) in cells.iter().enumerate() {
            if cell.vertices.iter().any(|&v| v >= vertices.len()) {
                return Err(SmartError::configuration(format!("cell {} references a missing vertex", i)));
            }
            if !(cell.measure.is_finite() && cell.measure > 0.0) {
                return Err(SmartError::configuration(format!("cell {} has non-positive measure", i)));
            }
        }
        for (i, facet) in facets.iter().enumerate() {
            if facet.vertices.iter().any(|&v| v >= vertices.len()) {
                return Err(SmartError::configuration(format!("facet {} references a missing vertex", i)));
            }
            if facet.cells.is_empty() || facet.cells.len() > 2 || facet.cells.iter().any(|&c| c >= cells.len()) {
                return Err(SmartError::configuration(format!(
                    "facet {} must reference one or two existing cells",
                    i
                )));
            }
            if !(facet.measure.is_finite() && facet.measure > 0.0) {
                return Err(SmartError::configuration(format!("facet {} has non-positive measure", i)));
            }
        }

        Ok(Self {
            dimension,
            vertices,
            cells,
            facets,
        })
    }

    pub fn cells(&self) -> &[MeshCell] {
        &self.cells
    }

    pub fn facets(&self) -> &[MeshFacet] {
        &self.facets
    }

    /// Re-tag every facet whose centroid satisfies `predicate`
    pub fn mark_facets(&mut self, marker: i32, predicate: impl Fn(Point) -> bool) {
        for facet in &mut self.facets {
            if predicate(facet.centroid) {
                facet.marker = marker;
            }
        }
    }
}

impl MeshAdapter for ParentMesh {
    fn topological_dimension(&self) -> usize {
        self.dimension
    }

    fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    fn vertex(&self, vertex: usize) -> Point {
        self.vertices[vertex]
    }

    fn num_cells(&self) -> usize {
        self.cells.len()
    }

    fn cell_marker(&self, cell: usize) -> i32 {
        self.cells[cell].marker
    }

    fn cell_measure(&self, cell: usize) -> f64 {
        self.cells[cell].measure
    }

    fn cell_centroid(&self, cell: usize) -> Point {
        self.cells[cell].centroid
    }

    fn num_facets(&self) -> usize {
        self.facets.len()
    }

    fn facet_marker(&self, facet: usize) -> i32 {
        self.facets[facet].marker
    }

    fn facet_measure(&self, facet: usize) -> f64 {
        self.facets[facet].measure
    }

    fn facet_centroid(&self, facet: usize) -> Point {
        self.facets[facet].centroid
    }

    fn facet_vertices(&self, facet: usize) -> &[usize] {
        &self.facets[facet].vertices
    }

    fn facet_cells(&self, facet: usize) -> &[usize] {
        &self.facets[facet].cells
    }
}

// =================================================================================================
// Structured box builder
// =================================================================================================

/// Default marker of interface facets
pub const INTERFACE_MARKER: i32 = 12;
/// Boundary facets get this multiple of the adjacent cell marker
pub const BOUNDARY_MARKER_FACTOR: i32 = 10;

type CellMarkerFn = Box<dyn Fn(Point) -> i32 + Send + Sync>;

/// Structured hexahedral mesh of a box
///
/// ```rust
/// use smart_rs::physics::mesh::{BoxMeshBuilder, MeshAdapter};
///
/// let mesh = BoxMeshBuilder::new([1.0, 1.0, 1.0], [2, 2, 2]).build().unwrap();
/// assert_eq!(mesh.num_cells(), 8);
/// assert_eq!(mesh.num_facets(), 36);
/// ```
pub struct BoxMeshBuilder {
    origin: Point,
    extent: Point,
    divisions: [usize; 3],
    cell_marker: CellMarkerFn,
    interface_marker: i32,
}

impl BoxMeshBuilder {
    /// Box `[0, extent]` split into `divisions` cells per axis, all marked 1
    pub fn new(extent: Point, divisions: [usize; 3]) -> Self {
        Self {
            origin: [0.0; 3],
            extent,
            divisions,
            cell_marker: Box::new(|_| 1),
            interface_marker: INTERFACE_MARKER,
        }
    }

    /// Unit cube with an inner cube `[lo, hi]^3` marked 2 and the rest marked 1
    pub fn cube_in_cube(n: usize, lo: f64, hi: f64) -> Self {
        Self::new([1.0; 3], [n; 3]).with_cell_marker(move |c| {
            let inside = c.iter().all(|&x| x > lo - f64::EPSILON && x < hi + f64::EPSILON);
            if inside { 2 } else { 1 }
        })
    }

    pub fn with_origin(mut self, origin: Point) -> Self {
        self.origin = origin;
        self
    }

    /// Cell marker as a function of the cell centroid
    pub fn with_cell_marker(mut self, marker: impl Fn(Point) -> i32 + Send + Sync + 'static) -> Self {
        self.cell_marker = Box::new(marker);
        self
    }

    pub fn with_interface_marker(mut self, marker: i32) -> Self {
        self.interface_marker = marker;
        self
    }

    pub fn build(&self) -> Result<ParentMesh> {
        let [nx, ny, nz] = self.divisions;
        if nx == 0 || ny == 0 || nz == 0 {
            return Err(SmartError::configuration("box mesh needs at least one cell per axis"));
        }
        if self.extent.iter().any(|&e| !(e.is_finite() && e > 0.0)) {
            return Err(SmartError::configuration("box extent must be positive"));
        }

        let h = [
            self.extent[0] / nx as f64,
            self.extent[1] / ny as f64,
            self.extent[2] / nz as f64,
        ];
        let vid = |i: usize, j: usize, k: usize| i + (nx + 1) * (j + (ny + 1) * k);
        let cid = |i: usize, j: usize, k: usize| i + nx * (j + ny * k);

        let mut vertices = Vec::with_capacity((nx + 1) * (ny + 1) * (nz + 1));
        for k in 0..=nz {
            for j in 0..=ny {
                for i in 0..=nx {
                    vertices.push([
                        self.origin[0] + i as f64 * h[0],
                        self.origin[1] + j as f64 * h[1],
                        self.origin[2] + k as f64 * h[2],
                    ]);
                }
            }
        }

        let mut cells = Vec::with_capacity(nx * ny * nz);
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let corners = vec![
                        vid(i, j, k),
                        vid(i + 1, j, k),
                        vid(i + 1, j + 1, k),
                        vid(i, j + 1, k),
                        vid(i, j, k + 1),
                        vid(i + 1, j, k + 1),
                        vid(i + 1, j + 1, k + 1),
                        vid(i, j + 1, k + 1),
                    ];
                    let centroid = [
                        self.origin[0] + (i as f64 + 0.5) * h[0],
                        self.origin[1] + (j as f64 + 0.5) * h[1],
                        self.origin[2] + (k as f64 + 0.5) * h[2],
                    ];
                    cells.push(MeshCell {
                        vertices: corners,
                        marker: (self.cell_marker)(centroid),
                        measure: h[0] * h[1] * h[2],
                        centroid,
                    });
                }
            }
        }

        let mut facets = Vec::new();
        let mut push_facet = |vertices_of_facet: Vec<usize>, adjacent: Vec<usize>, measure: f64| {
            let corners: Vec<Point> = vertices_of_facet.iter().map(|&v| vertices[v]).collect();
            let marker = match adjacent.as_slice() {
                [only] => BOUNDARY_MARKER_FACTOR * cells[*only].marker,
                [a, b] if cells[*a].marker != cells[*b].marker => self.interface_marker,
                _ => 0,
            };
            facets.push(MeshFacet {
                vertices: vertices_of_facet,
                cells: adjacent,
                marker,
                measure,
                centroid: midpoint(&corners),
            });
        };

        // faces normal to x
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..=nx {
                    let mut adjacent = Vec::with_capacity(2);
                    if i > 0 {
                        adjacent.push(cid(i - 1, j, k));
                    }
                    if i < nx {
                        adjacent.push(cid(i, j, k));
                    }
                    push_facet(
                        vec![vid(i, j, k), vid(i, j + 1, k), vid(i, j + 1, k + 1), vid(i, j, k + 1)],
                        adjacent,
                        h[1] * h[2],
                    );
                }
            }
        }
        // faces normal to y
        for k in 0..nz {
            for j in 0..=ny {
                for i in 0..nx {
                    let mut adjacent = Vec::with_capacity(2);
                    if j > 0 {
                        adjacent.push(cid(i, j - 1, k));
                    }
                    if j < ny {
                        adjacent.push(cid(i, j, k));
                    }
                    push_facet(
                        vec![vid(i, j, k), vid(i + 1, j, k), vid(i + 1, j, k + 1), vid(i, j, k + 1)],
                        adjacent,
                        h[0] * h[2],
                    );
                }
            }
        }
        // faces normal to z
        for k in 0..=nz {
            for j in 0..ny {
                for i in 0..nx {
                    let mut adjacent = Vec::with_capacity(2);
                    if k > 0 {
                        adjacent.push(cid(i, j, k - 1));
                    }
                    if k < nz {
                        adjacent.push(cid(i, j, k));
                    }
                    push_facet(
                        vec![vid(i, j, k), vid(i + 1, j, k), vid(i + 1, j + 1, k), vid(i, j + 1, k)],
                        adjacent,
                        h[0] * h[1],
                    );
                }
            }
        }

        ParentMesh::new(3, vertices, cells, facets)
    }
}

// =================================================================================================
// Sub-meshes
// =================================================================================================

/// Kind of parent entity a sub-mesh is made of
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Cell,
    Facet,
}

/// Two-point diffusion connection between local entities
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Connection {
    pub a: usize,
    pub b: usize,
    /// Shared measure over centroid distance (mesh length units `L^(d-2)`)
    pub transmissibility: f64,
}

/// Entities of one compartment with their local numbering
#[derive(Debug, Clone)]
pub struct SubMesh {
    compartment: String,
    dimension: usize,
    kind: EntityKind,
    entities: Vec<usize>,
    global_to_local: HashMap<usize, usize>,
    measures: Vec<f64>,
    centroids: Vec<Point>,
    connections: Vec<Connection>,
}

impl SubMesh {
    /// Select the entities tagged with the compartment's marker
    ///
    /// Compartments of the mesh dimension use cells, compartments one
    /// dimension lower use facets; anything else is a configuration error.
    pub fn extract(mesh: &dyn MeshAdapter, compartment: &Compartment) -> Result<Self> {
        let tdim = mesh.topological_dimension();
        let marker = compartment.cell_marker();

        let kind = if compartment.dimensionality() == tdim {
            EntityKind::Cell
        } else if compartment.dimensionality() + 1 == tdim {
            EntityKind::Facet
        } else {
            return Err(SmartError::configuration(format!(
                "compartment '{}' has dimension {} but the mesh has dimension {}",
                compartment.name(),
                compartment.dimensionality(),
                tdim
            )));
        };

        let entities: Vec<usize> = match kind {
            EntityKind::Cell => (0..mesh.num_cells()).filter(|&c| mesh.cell_marker(c) == marker).collect(),
            EntityKind::Facet => (0..mesh.num_facets()).filter(|&f| mesh.facet_marker(f) == marker).collect(),
        };
        let global_to_local: HashMap<usize, usize> =
            entities.iter().enumerate().map(|(local, &global)| (global, local)).collect();

        let (measures, centroids): (Vec<f64>, Vec<Point>) = entities
            .iter()
            .map(|&e| match kind {
                EntityKind::Cell => (mesh.cell_measure(e), mesh.cell_centroid(e)),
                EntityKind::Facet => (mesh.facet_measure(e), mesh.facet_centroid(e)),
            })
            .unzip();

        let connections = match kind {
            EntityKind::Cell => cell_connections(mesh, &global_to_local, &centroids),
            EntityKind::Facet => facet_connections(mesh, &entities, &centroids),
        };

        Ok(Self {
            compartment: compartment.name().to_string(),
            dimension: compartment.dimensionality(),
            kind,
            entities,
            global_to_local,
            measures,
            centroids,
            connections,
        })
    }

    pub fn compartment(&self) -> &str {
        &self.compartment
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Parent entity indices, in local order
    pub fn entities(&self) -> &[usize] {
        &self.entities
    }

    /// Local index of a parent entity
    pub fn local_index(&self, global: usize) -> Option<usize> {
        self.global_to_local.get(&global).copied()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn measures(&self) -> &[f64] {
        &self.measures
    }

    pub fn centroids(&self) -> &[Point] {
        &self.centroids
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Volume or area of the whole sub-mesh
    pub fn total_measure(&self) -> f64 {
        self.measures.iter().sum()
    }
}

fn cell_connections(
    mesh: &dyn MeshAdapter,
    global_to_local: &HashMap<usize, usize>,
    centroids: &[Point],
) -> Vec<Connection> {
    let mut connections = Vec::new();
    for facet in 0..mesh.num_facets() {
        if let [c0, c1] = mesh.facet_cells(facet) {
            if let (Some(&a), Some(&b)) = (global_to_local.get(c0), global_to_local.get(c1)) {
                let m = mesh.facet_centroid(facet);
                let length = distance(&centroids[a], &m) + distance(&m, &centroids[b]);
                connections.push(Connection {
                    a,
                    b,
                    transmissibility: mesh.facet_measure(facet) / length,
                });
            }
        }
    }
    connections
}

fn facet_connections(mesh: &dyn MeshAdapter, entities: &[usize], centroids: &[Point]) -> Vec<Connection> {
    // ridge (sorted vertex list) -> local facets sharing it
    let mut ridges: BTreeMap<Vec<usize>, Vec<usize>> = BTreeMap::new();
    for (local, &facet) in entities.iter().enumerate() {
        let vertices = mesh.facet_vertices(facet);
        match vertices.len() {
            0 | 1 => {}
            2 => {
                for &v in vertices {
                    ridges.entry(vec![v]).or_default().push(local);
                }
            }
            n => {
                for i in 0..n {
                    let mut edge = vec![vertices[i], vertices[(i + 1) % n]];
                    edge.sort_unstable();
                    ridges.entry(edge).or_default().push(local);
                }
            }
        }
    }

    let mut connections = Vec::new();
    for (ridge, sharing) in &ridges {
        let points: Vec<Point> = ridge.iter().map(|&v| mesh.vertex(v)).collect();
        let measure = if points.len() == 2 { distance(&points[0], &points[1]) } else { 1.0 };
        let m = midpoint(&points);

        for (i, &a) in sharing.iter().enumerate() {
            for &b in &sharing[i + 1..] {
                let length = distance(&centroids[a], &m) + distance(&m, &centroids[b]);
                if length > 0.0 {
                    connections.push(Connection {
                        a,
                        b,
                        transmissibility: measure / length,
                    });
                }
            }
        }
    }
    connections
}

// =================================================================================================
// Tests
// =================================================================================================
