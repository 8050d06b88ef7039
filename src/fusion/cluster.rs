use crate::fusion::{BBox, Ltrb};

#[derive(Debug, Clone, Copy)]
struct Member {
    bbox: BBox<Ltrb>,
    score: f32,
    model: usize,
}

///
/// A group of mutually overlapping detections of one class, possibly coming
/// from several models.
///
/// The representative box is the score-weighted mean of the member boxes and
/// the representative score the plain mean of member scores. Both are
/// recomputed on every `push` since later membership tests run against the
/// up-to-date representative.
///
#[derive(Debug, Clone)]
pub struct Cluster {
    class_id: i32,
    members: Vec<Member>,
    bbox: BBox<Ltrb>,
    score: f32,
}

impl Cluster {
    pub fn new(bbox: BBox<Ltrb>, score: f32, class_id: i32, model: usize) -> Self {
        Self {
            class_id,
            members: vec![Member { bbox, score, model }],
            bbox,
            score,
        }
    }

    #[inline]
    pub fn class_id(&self) -> i32 {
        self.class_id
    }

    #[inline]
    pub fn bbox(&self) -> &BBox<Ltrb> {
        &self.bbox
    }

    #[inline]
    pub fn score(&self) -> f32 {
        self.score
    }

    #[inline]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Number of distinct models among the members.
    pub fn model_count(&self) -> usize {
        let mut models: Vec<usize> = self.members.iter().map(|m| m.model).collect();
        models.sort_unstable();
        models.dedup();

        models.len()
    }

    pub fn push(&mut self, bbox: BBox<Ltrb>, score: f32, model: usize) {
        self.members.push(Member { bbox, score, model });
        self.recompute();
    }

    fn recompute(&mut self) {
        let mut acc = [0.0f32; 4];
        let mut score_sum = 0.0f32;

        for member in &self.members {
            for (a, c) in acc.iter_mut().zip(member.bbox.coords().iter()) {
                *a += member.score * c;
            }
            score_sum += member.score;
        }

        self.score = score_sum / self.members.len() as f32;

        // All-zero scores only survive a zero skip threshold; fall back to
        // the unweighted mean there.
        self.bbox = if score_sum > 0.0 {
            BBox::from_array(acc).map(|_, c| c / score_sum)
        } else {
            let n = self.members.len() as f32;
            let mut mean = [0.0f32; 4];
            for member in &self.members {
                for (a, c) in mean.iter_mut().zip(member.bbox.coords().iter()) {
                    *a += c / n;
                }
            }

            BBox::from_array(mean)
        };
    }
}

#[test]
fn cluster_weighted_box_follows_scores() {
    let mut cluster = Cluster::new(BBox::ltrb(0.0, 0.0, 0.4, 0.4), 0.75, 0, 0);
    cluster.push(BBox::ltrb(0.4, 0.4, 0.8, 0.8), 0.25, 1);

    let expected = [0.1, 0.1, 0.5, 0.5];
    for (got, want) in cluster.bbox().coords().iter().zip(expected.iter()) {
        assert!((got - want).abs() < 1e-6, "{} != {}", got, want);
    }
    assert!((cluster.score() - 0.5).abs() < 1e-6);
    assert_eq!(cluster.member_count(), 2);
    assert_eq!(cluster.model_count(), 2);
}

#[test]
fn cluster_counts_models_once() {
    let mut cluster = Cluster::new(BBox::ltrb(0.0, 0.0, 0.4, 0.4), 0.9, 3, 1);
    cluster.push(BBox::ltrb(0.0, 0.0, 0.41, 0.41), 0.8, 1);
    cluster.push(BBox::ltrb(0.0, 0.0, 0.39, 0.39), 0.7, 0);

    assert_eq!(cluster.member_count(), 3);
    assert_eq!(cluster.model_count(), 2);
    assert_eq!(cluster.class_id(), 3);
}

#[test]
fn cluster_zero_scores_use_plain_mean() {
    let mut cluster = Cluster::new(BBox::ltrb(0.0, 0.0, 0.2, 0.2), 0.0, 0, 0);
    cluster.push(BBox::ltrb(0.2, 0.2, 0.4, 0.4), 0.0, 1);

    let coords = cluster.bbox().coords();
    assert!((coords[0] - 0.1).abs() < 1e-6);
    assert!((coords[3] - 0.3).abs() < 1e-6);
    assert_eq!(cluster.score(), 0.0);
}
