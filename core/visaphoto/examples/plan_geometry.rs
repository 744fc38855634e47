//! Print the stage-1 resize and final crop plan for a few typical uploads.
//!
//! Usage:
//!   cargo run --example plan_geometry

use visaphoto::{CropPlan, CropPlanner, FaceBox, ImageDimensions};

fn main() -> Result<(), visaphoto::VisaPhotoError> {
    let planner = CropPlanner::default();

    let samples = [
        ("square, face upper-center", (1000, 1000), Some((300.0, 200.0, 150.0, 150.0))),
        ("phone portrait, small face", (3024, 4032), Some((1300.0, 1100.0, 400.0, 420.0))),
        ("landscape, face at edge", (1920, 1080), Some((20.0, 300.0, 200.0, 220.0))),
        ("close-up selfie", (800, 1000), Some((0.0, 0.0, 778.0, 1200.0))),
        ("no face", (640, 480), None),
    ];

    for (label, (width, height), face) in samples {
        let original = ImageDimensions::new(width, height)?;
        let stage1 = planner.stage1_target(original)?;
        println!("=== {label} ({original}) ===");
        println!("  stage 1: cover-fit to {}", stage1.target);

        let face = face.map(|(x, y, width, height)| FaceBox {
            x,
            y,
            width,
            height,
        });
        if let Some(face) = &face {
            println!(
                "  face: ({}, {}, {}x{})",
                face.x, face.y, face.width, face.height
            );
        }

        match planner.plan(stage1.target, face.as_ref())? {
            CropPlan::FaceCentered { scale, extract } => println!(
                "  → scale to {}, extract ({}, {}, {}x{})",
                scale.target, extract.left, extract.top, extract.width, extract.height
            ),
            CropPlan::CoverFit { resize, reason } => {
                println!("  → cover-fit to {} ({reason})", resize.target)
            }
        }
        println!();
    }

    Ok(())
}
