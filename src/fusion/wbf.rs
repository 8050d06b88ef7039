use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::fusion::{iou, normalize::ensure_normalized, BBox, Cluster, DetectionSet, FusedDetection, Ltrb};

pub(crate) fn check_threshold(name: &'static str, value: f32) -> Result<(), Error> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::InvalidThreshold { name, value })
    }
}

///
/// Agreement penalty applied to a cluster's mean score when it is emitted.
///
/// With `N` models fused:
///
/// * `ModelAgreement` - `mean * distinct_models / N`
/// * `MemberCount` - `mean * min(members, N) / N`
/// * `Disabled` - `mean`
///
/// None of them lets a cluster score exceed its best member.
///
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreDampening {
    ModelAgreement,
    MemberCount,
    Disabled,
}

impl Default for ScoreDampening {
    fn default() -> Self {
        ScoreDampening::ModelAgreement
    }
}

impl std::str::FromStr for ScoreDampening {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "model_agreement" | "model-agreement" => Ok(ScoreDampening::ModelAgreement),
            "member_count" | "member-count" => Ok(ScoreDampening::MemberCount),
            "disabled" | "none" => Ok(ScoreDampening::Disabled),
            other => Err(format!("unknown score dampening `{}`", other)),
        }
    }
}

impl ScoreDampening {
    fn apply(&self, cluster: &Cluster, model_total: usize) -> f32 {
        let n = model_total.max(1);
        let factor = match self {
            ScoreDampening::ModelAgreement => cluster.model_count().min(n) as f32 / n as f32,
            ScoreDampening::MemberCount => cluster.member_count().min(n) as f32 / n as f32,
            ScoreDampening::Disabled => 1.0,
        };

        cluster.score() * factor
    }
}

#[derive(Debug, Clone, Copy)]
struct Pooled {
    bbox: BBox<Ltrb>,
    score: f32,
    class_id: i32,
    model: usize,
}

///
/// Weighted Boxes Fusion over detections of several models for one image.
///
/// ```text
///     Parameters
///     ----------
///     iou_thr : f32
///         Minimum IoU between a detection and a cluster's representative box
///         for the detection to join the cluster.
///     skip_box_thr : f32
///         Detections scoring below this value are discarded before fusion.
///     dampening : ScoreDampening
///         How a cluster's score is penalized when not all models agree.
/// ```
///
#[derive(Debug, Clone)]
pub struct WeightedBoxesFusion {
    iou_thr: f32,
    skip_box_thr: f32,
    dampening: ScoreDampening,
}

impl WeightedBoxesFusion {
    pub fn new(iou_thr: f32 /*=0.55*/, skip_box_thr: f32 /*=0.0*/) -> Result<Self, Error> {
        check_threshold("iou_thr", iou_thr)?;
        check_threshold("skip_box_thr", skip_box_thr)?;

        Ok(Self {
            iou_thr,
            skip_box_thr,
            dampening: ScoreDampening::default(),
        })
    }

    pub fn with_dampening(mut self, dampening: ScoreDampening) -> Self {
        self.dampening = dampening;
        self
    }

    #[inline]
    pub fn iou_thr(&self) -> f32 {
        self.iou_thr
    }

    #[inline]
    pub fn skip_box_thr(&self) -> f32 {
        self.skip_box_thr
    }

    #[inline]
    pub fn dampening(&self) -> ScoreDampening {
        self.dampening
    }

    /// Fuse the normalized detection sets of all models for one image.
    ///
    /// ```text
    ///     Parameters
    ///     ----------
    ///     sets : &[DetectionSet]
    ///         One set per model, every box in the normalized frame. An empty
    ///         set is a model that found nothing and still counts towards `N`.
    ///
    ///     Returns
    ///     -------
    ///     Vec<FusedDetection>
    ///         One detection per cluster, sorted by score descending.
    /// ```
    ///
    pub fn fuse(&self, sets: &[DetectionSet]) -> Result<Vec<FusedDetection>, Error> {
        ensure_normalized(sets)?;

        let mut pooled = self.pool(sets);
        pooled.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let mut clusters: Vec<Cluster> = Vec::new();
        for det in pooled {
            match self.find_matching_cluster(&clusters, &det) {
                Some(idx) => clusters[idx].push(det.bbox, det.score, det.model),
                None => clusters.push(Cluster::new(det.bbox, det.score, det.class_id, det.model)),
            }
        }

        let model_total = sets.len();
        let mut fused: Vec<FusedDetection> = clusters
            .iter()
            .map(|cluster| FusedDetection {
                bbox: *cluster.bbox(),
                score: self.dampening.apply(cluster, model_total),
                class_id: cluster.class_id(),
                model_count: cluster.model_count(),
                member_count: cluster.member_count(),
            })
            .collect();

        fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        tracing::trace!(
            models = model_total,
            clusters = fused.len(),
            "weighted boxes fusion done"
        );

        Ok(fused)
    }

    fn pool(&self, sets: &[DetectionSet]) -> Vec<Pooled> {
        let mut pooled = Vec::with_capacity(sets.iter().map(|s| s.len()).sum());

        for (model, set) in sets.iter().enumerate() {
            for det in set {
                if !(det.score >= self.skip_box_thr) {
                    continue;
                }

                let bbox = det.bbox.sanitized();
                if bbox.area() <= 0.0 {
                    tracing::warn!(model, coords = ?bbox.coords(), "zero area box skipped");
                    continue;
                }

                pooled.push(Pooled {
                    bbox,
                    score: det.score,
                    class_id: det.class_id,
                    model,
                });
            }
        }

        pooled
    }

    /// Index of the same-class cluster with the highest IoU `>= iou_thr`;
    /// ties keep the earliest created cluster.
    fn find_matching_cluster(&self, clusters: &[Cluster], det: &Pooled) -> Option<usize> {
        let (indices, candidates): (Vec<usize>, Vec<BBox<Ltrb>>) = clusters
            .iter()
            .enumerate()
            .filter(|(_, c)| c.class_id() == det.class_id)
            .map(|(idx, c)| (idx, *c.bbox()))
            .unzip();

        let overlaps = iou(&det.bbox, &candidates);

        let mut best: Option<(usize, f32)> = None;
        for (&idx, &overlap) in indices.iter().zip(overlaps.iter()) {
            if overlap < self.iou_thr {
                continue;
            }

            match best {
                Some((_, best_overlap)) if overlap <= best_overlap => {}
                _ => best = Some((idx, overlap)),
            }
        }

        best.map(|(idx, _)| idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::Detection;

    fn det(coords: [f32; 4], score: f32, class_id: i32) -> Detection {
        Detection::new(BBox::from_array(coords), score, class_id)
    }

    #[test]
    fn rejects_out_of_range_thresholds() {
        assert!(WeightedBoxesFusion::new(1.5, 0.1).is_err());
        assert!(WeightedBoxesFusion::new(0.5, -0.1).is_err());
        assert!(WeightedBoxesFusion::new(std::f32::NAN, 0.1).is_err());
        assert!(WeightedBoxesFusion::new(0.0, 1.0).is_ok());
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let wbf = WeightedBoxesFusion::new(0.5, 0.0).unwrap();

        assert!(wbf.fuse(&[]).unwrap().is_empty());
        assert!(wbf.fuse(&[vec![], vec![]]).unwrap().is_empty());
    }

    #[test]
    fn two_models_agreeing_fuse_into_one() {
        let wbf = WeightedBoxesFusion::new(0.5, 0.0).unwrap();
        let sets = vec![
            vec![det([0.10, 0.10, 0.50, 0.50], 0.8, 0)],
            vec![det([0.12, 0.12, 0.52, 0.52], 0.6, 0)],
        ];

        let fused = wbf.fuse(&sets).unwrap();
        assert_eq!(fused.len(), 1);

        let x1 = fused[0].bbox.left();
        let expected = (0.8 * 0.10 + 0.6 * 0.12) / 1.4;
        assert!((x1 - expected).abs() < 1e-6);
        // closer to the stronger box
        assert!((x1 - 0.10).abs() < (x1 - 0.12).abs());
        assert!((fused[0].score - 0.7).abs() < 1e-6);
        assert_eq!(fused[0].model_count, 2);
        assert_eq!(fused[0].member_count, 2);
    }

    #[test]
    fn consensus_beats_single_model() {
        let wbf = WeightedBoxesFusion::new(0.5, 0.0).unwrap();
        let alone_a = wbf.fuse(&[vec![det([0.1, 0.1, 0.5, 0.5], 0.8, 0)], vec![]]).unwrap();
        let alone_b = wbf.fuse(&[vec![], vec![det([0.12, 0.12, 0.52, 0.52], 0.6, 0)]]).unwrap();
        let together = wbf
            .fuse(&[
                vec![det([0.1, 0.1, 0.5, 0.5], 0.8, 0)],
                vec![det([0.12, 0.12, 0.52, 0.52], 0.6, 0)],
            ])
            .unwrap();

        assert!(together[0].score > alone_a[0].score);
        assert!(together[0].score > alone_b[0].score);
    }

    #[test]
    fn different_classes_never_merge() {
        let wbf = WeightedBoxesFusion::new(0.0, 0.0).unwrap();
        let sets = vec![
            vec![det([0.2, 0.2, 0.6, 0.6], 0.9, 0)],
            vec![det([0.2, 0.2, 0.6, 0.6], 0.9, 1)],
        ];

        let fused = wbf.fuse(&sets).unwrap();
        assert_eq!(fused.len(), 2);
        assert!(fused.iter().all(|f| f.member_count == 1));
    }

    #[test]
    fn skip_threshold_prefilters() {
        let wbf = WeightedBoxesFusion::new(0.5, 0.3).unwrap();
        let sets = vec![vec![
            det([0.1, 0.1, 0.3, 0.3], 0.29, 0),
            det([0.5, 0.5, 0.9, 0.9], 0.30, 0),
        ]];

        let fused = wbf.fuse(&sets).unwrap();
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].bbox.coords(), [0.5, 0.5, 0.9, 0.9]);
    }

    #[test]
    fn single_model_is_greedy_clustering() {
        let wbf = WeightedBoxesFusion::new(0.5, 0.0)
            .unwrap()
            .with_dampening(ScoreDampening::Disabled);
        let set = vec![
            det([0.10, 0.10, 0.30, 0.30], 0.9, 0),
            det([0.11, 0.11, 0.31, 0.31], 0.5, 0),
            det([0.60, 0.60, 0.80, 0.80], 0.6, 0),
            det([0.00, 0.60, 0.10, 0.70], 0.2, 0),
        ];

        let fused = wbf.fuse(&[set.clone()]).unwrap();
        assert_eq!(fused.len(), 3);
        assert!(fused.len() <= set.len());
        assert!((fused[0].score - 0.7).abs() < 1e-6);
        assert_eq!(fused[0].member_count, 2);
    }

    #[test]
    fn joins_best_overlapping_cluster() {
        let wbf = WeightedBoxesFusion::new(0.2, 0.0).unwrap();
        let set = vec![
            det([0.00, 0.00, 0.40, 0.40], 0.9, 0),
            det([0.30, 0.00, 0.70, 0.40], 0.8, 0),
            // overlaps both seeds, the second one more
            det([0.25, 0.00, 0.65, 0.40], 0.5, 0),
        ];

        let fused = wbf
            .with_dampening(ScoreDampening::Disabled)
            .fuse(&[set])
            .unwrap();
        assert_eq!(fused.len(), 2);

        let second = fused.iter().find(|f| f.bbox.left() > 0.2).unwrap();
        assert_eq!(second.member_count, 2);
    }

    #[test]
    fn cluster_score_never_exceeds_best_member() {
        let sets = vec![
            vec![det([0.1, 0.1, 0.4, 0.4], 0.95, 0), det([0.1, 0.1, 0.41, 0.41], 0.3, 0)],
            vec![det([0.11, 0.1, 0.4, 0.4], 0.6, 0)],
            vec![det([0.1, 0.12, 0.4, 0.4], 0.8, 0)],
        ];

        for dampening in &[
            ScoreDampening::ModelAgreement,
            ScoreDampening::MemberCount,
            ScoreDampening::Disabled,
        ] {
            let wbf = WeightedBoxesFusion::new(0.5, 0.0).unwrap().with_dampening(*dampening);
            for fused in wbf.fuse(&sets).unwrap() {
                assert!(fused.score <= 0.95 + 1e-6, "{:?}: {}", dampening, fused.score);
            }
        }
    }

    #[test]
    fn dampening_variants_differ_on_repeated_model() {
        // Two boxes from the same model, the other model silent.
        let sets = vec![
            vec![det([0.1, 0.1, 0.4, 0.4], 0.8, 0), det([0.1, 0.1, 0.41, 0.41], 0.6, 0)],
            vec![],
        ];

        let agreement = WeightedBoxesFusion::new(0.5, 0.0).unwrap().fuse(&sets).unwrap();
        let members = WeightedBoxesFusion::new(0.5, 0.0)
            .unwrap()
            .with_dampening(ScoreDampening::MemberCount)
            .fuse(&sets)
            .unwrap();

        assert!((agreement[0].score - 0.35).abs() < 1e-6);
        assert!((members[0].score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn pixel_boxes_are_rejected() {
        let wbf = WeightedBoxesFusion::new(0.5, 0.0).unwrap();
        let sets = vec![vec![det([10.0, 10.0, 50.0, 50.0], 0.9, 0)]];

        assert!(wbf.fuse(&sets).is_err());
    }

    #[test]
    fn zero_area_boxes_are_skipped() {
        let wbf = WeightedBoxesFusion::new(0.5, 0.0).unwrap();
        let sets = vec![vec![
            det([0.2, 0.2, 0.2, 0.5], 0.9, 0),
            det([0.6, 0.7, 0.2, 0.1], 0.8, 0),
        ]];

        let fused = wbf.fuse(&sets).unwrap();
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].bbox.coords(), [0.2, 0.1, 0.6, 0.7]);
    }

    #[test]
    fn dampening_parses_from_str() {
        assert_eq!("member-count".parse::<ScoreDampening>(), Ok(ScoreDampening::MemberCount));
        assert_eq!("none".parse::<ScoreDampening>(), Ok(ScoreDampening::Disabled));
        assert!("max".parse::<ScoreDampening>().is_err());
    }
}
