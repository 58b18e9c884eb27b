//! A basic example: three directions constrained pairwise perpendicular.
use gcs3d::{ConstraintKind, DoglegCfg, System, datatypes::Direction3};
use nalgebra::Vector3;

fn main() {
    // Define the geometry. The starting values are rough guesses; the solver
    // will move them into a consistent configuration.
    let mut sys = System::new();
    sys.set_config(DoglegCfg::default().with_tol_f(1e-9));
    let d1 = sys.add_geometry(Direction3::new(7.0, -0.5, 0.3));
    let d2 = sys.add_geometry(Direction3::new(0.2, 0.5, -0.1));
    let d3 = sys.add_geometry(Direction3::new(1.2, 5.9, 0.43));

    // Constrain every pair to be perpendicular.
    for (a, b) in [(d1, d2), (d2, d3), (d3, d1)] {
        sys.add_constraint(ConstraintKind::Perpendicular, a, b)
            .expect("direction pairs support perpendicularity");
    }

    // Run the solver!
    match sys.solve() {
        Ok(report) => {
            println!(
                "{:?} after {} iterations, |r| = {:e}",
                report.status, report.iterations, report.residual
            );
            for (name, id) in [("d1", d1), ("d2", d2), ("d3", d3)] {
                let v = Vector3::from(*sys.geometry_value::<Direction3>(id).unwrap());
                println!("{name} = ({:.6}, {:.6}, {:.6})", v.x, v.y, v.z);
            }
        }
        Err(e) => {
            eprintln!("could not solve this constraint system: {e}");
        }
    }
}
