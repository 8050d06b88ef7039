use wbf_ensemble::fusion::{normalize, PostFilter};
use wbf_ensemble::{BBox, Detection, Resolution, ScoreDampening, WeightedBoxesFusion};

fn main() -> Result<(), wbf_ensemble::Error> {
    let resolution = Resolution::new(1024, 1024);

    let models = vec![
        vec![
            Detection::new(BBox::ltrb(10.0, 10.0, 50.0, 50.0), 0.8, 0),
            Detection::new(BBox::ltrb(600.0, 420.0, 690.0, 500.0), 0.35, 0),
        ],
        vec![
            Detection::new(BBox::ltrb(12.0, 12.0, 52.0, 52.0), 0.6, 0),
            Detection::new(BBox::ltrb(604.0, 418.0, 688.0, 506.0), 0.9, 0),
        ],
        vec![Detection::new(BBox::ltrb(300.0, 300.0, 340.0, 330.0), 0.5, 0)],
    ];

    let normalized: Vec<_> = models.iter().map(|set| normalize(set, resolution)).collect();
    let post = PostFilter::new(0.2)?;

    for dampening in &[
        ScoreDampening::ModelAgreement,
        ScoreDampening::MemberCount,
        ScoreDampening::Disabled,
    ] {
        let wbf = WeightedBoxesFusion::new(0.5, 0.22)?.with_dampening(*dampening);
        let fused = wbf.fuse(&normalized)?;

        println!("{:?}:", dampening);
        for det in post.apply(&fused, resolution) {
            println!(
                "  class {} score {:.3} at ({}, {}) {}x{}",
                det.class_id, det.score, det.x, det.y, det.width, det.height
            );
        }
    }

    Ok(())
}
