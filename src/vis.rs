//! Sending solutions to a GLVis server.
//!
//! Every rank sends its piece of the solution on the low-order-refined mesh, whose vertices are
//! the nodes of the high-order space, as a linear grid function.
use crate::comm::Communicator;
use crate::mesh::HEX_CORNERS;
use crate::report::format_g;
use crate::space::H1Space;
use eyre::WrapErr;
use std::io;
use std::io::{BufWriter, Write};
use std::net::TcpStream;

pub const GLVIS_HOST: &str = "localhost";
pub const GLVIS_PORT: u16 = 19916;

/// Writes the local node lattice of `space` as a mesh of linear hexahedra, in MFEM's mesh format.
pub fn write_refined_mesh(out: &mut impl Write, space: &H1Space) -> io::Result<()> {
    let [nx, ny, nz] = space.local_dims();
    let cells = [nx - 1, ny - 1, nz - 1];
    let node = |i: usize, j: usize, k: usize| i + nx * (j + ny * k);

    writeln!(out, "MFEM mesh v1.0")?;
    writeln!(out)?;
    writeln!(out, "dimension")?;
    writeln!(out, "3")?;
    writeln!(out)?;
    writeln!(out, "elements")?;
    writeln!(out, "{}", cells.iter().product::<usize>())?;
    for k in 0..cells[2] {
        for j in 0..cells[1] {
            for i in 0..cells[0] {
                // attribute 1, geometry 5 (hexahedron)
                write!(out, "1 5")?;
                for c in HEX_CORNERS {
                    write!(out, " {}", node(i + c[0], j + c[1], k + c[2]))?;
                }
                writeln!(out)?;
            }
        }
    }
    writeln!(out)?;
    writeln!(out, "boundary")?;
    writeln!(out, "0")?;
    writeln!(out)?;
    writeln!(out, "vertices")?;
    writeln!(out, "{}", space.num_nodes())?;
    writeln!(out, "3")?;
    for n in 0..space.num_nodes() {
        let p = space.node_coordinates(n);
        writeln!(out, "{} {} {}", format_g(p.x, 8), format_g(p.y, 8), format_g(p.z, 8))?;
    }
    Ok(())
}

/// Writes a local vector as a linear grid function on the refined mesh, components interleaved.
pub fn write_grid_function(out: &mut impl Write, vdim: usize, values: &[f64]) -> io::Result<()> {
    writeln!(out, "FiniteElementSpace")?;
    writeln!(out, "FiniteElementCollection: H1_3D_P1")?;
    writeln!(out, "VDim: {vdim}")?;
    writeln!(out, "Ordering: 1")?;
    writeln!(out)?;
    for value in values {
        writeln!(out, "{}", format_g(*value, 8))?;
    }
    Ok(())
}

/// Sends this rank's piece of the solution `x` (a local vector of `space`) to a GLVis server.
pub fn send_solution<C: Communicator>(comm: &C, space: &H1Space, x: &[f64], host: &str, port: u16) -> eyre::Result<()> {
    let stream =
        TcpStream::connect((host, port)).wrap_err_with(|| format!("unable to connect to GLVis at {host}:{port}"))?;
    let mut out = BufWriter::new(stream);
    writeln!(out, "parallel {} {}", comm.size(), comm.rank())?;
    writeln!(out, "solution")?;
    write_refined_mesh(&mut out, space)?;
    write_grid_function(&mut out, space.vdim(), x)?;
    writeln!(out)?;
    writeln!(out, "keys maaAcvvv")?;
    out.flush().wrap_err("failed to send the solution to GLVis")?;
    Ok(())
}
