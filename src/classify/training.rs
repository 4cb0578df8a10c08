//! Offline fitting of the trained classifier from labelled feature windows.
use std::fmt::Write as _;

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::classify::trained::{sigmoid, LogisticModel, StandardScaler};
use crate::classify::{CalmState, TrainedClassifier};
use crate::config::TrainingSettings;
use crate::dsp::{FeatureVector, PipelineError};

const CLASSES: [CalmState; 2] = [CalmState::Calm, CalmState::NotCalm];
const GRADIENT_TOLERANCE: f64 = 1e-6;
const LEARNING_RATE: f64 = 1.0;

/// Labelled feature windows. Only alpha, beta and ratio are model inputs; the
/// label never feeds back into a feature.
#[derive(Clone, Debug, Default)]
pub struct TrainingSet {
    pub rows: Vec<(FeatureVector, CalmState)>,
}
impl TrainingSet {
    /// Labels every window of a calm and a not-calm session, then shuffles.
    pub fn from_sessions(calm: &[FeatureVector], not_calm: &[FeatureVector], seed: u64) -> Self {
        let mut rows: Vec<(FeatureVector, CalmState)> = calm
            .iter()
            .map(|f| (*f, CalmState::Calm))
            .chain(not_calm.iter().map(|f| (*f, CalmState::NotCalm)))
            .collect();
        rows.shuffle(&mut StdRng::seed_from_u64(seed));
        Self { rows }
    }
    pub fn len(&self) -> usize {
        self.rows.len()
    }
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
    pub fn count(&self, state: CalmState) -> usize {
        self.rows.iter().filter(|(_, s)| *s == state).count()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Clone, Debug)]
pub struct TrainingReport {
    pub total_samples: usize,
    pub calm_samples: usize,
    pub not_calm_samples: usize,
    pub train_samples: usize,
    pub test_samples: usize,
    pub accuracy: f64,
    /// Indexed like `[Calm, Not Calm]`.
    pub per_class: [ClassMetrics; 2],
    /// `confusion[actual][predicted]`, classes ordered `[Calm, Not Calm]`.
    pub confusion: [[usize; 2]; 2],
    pub iterations: usize,
}
impl TrainingReport {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "EEG CALMNESS MODEL TRAINING REPORT");
        let _ = writeln!(out, "{}", "=".repeat(50));
        let _ = writeln!(out, "Model           : Logistic Regression");
        let _ = writeln!(out, "Features        : Alpha, Beta, AlphaBetaRatio");
        let _ = writeln!(out, "Class balancing : Enabled");
        let _ = writeln!(out, "Total Samples   : {}", self.total_samples);
        let _ = writeln!(out, "Calm Samples    : {}", self.calm_samples);
        let _ = writeln!(out, "Not Calm Samples: {}", self.not_calm_samples);
        let _ = writeln!(out, "Train / Test    : {} / {}", self.train_samples, self.test_samples);
        let _ = writeln!(out, "Iterations      : {}", self.iterations);
        let _ = writeln!(out, "Test Accuracy   : {:.2}%\n", self.accuracy * 100.0);
        let _ = writeln!(out, "Classification Report:");
        let _ = writeln!(out, "{:>12} {:>10} {:>10} {:>10} {:>10}", "", "precision", "recall", "f1-score", "support");
        for (class, m) in CLASSES.iter().zip(&self.per_class) {
            let _ = writeln!(
                out,
                "{:>12} {:>10.2} {:>10.2} {:>10.2} {:>10}",
                class.label(),
                m.precision,
                m.recall,
                m.f1,
                m.support
            );
        }
        let _ = writeln!(out, "\nConfusion Matrix (rows actual, cols predicted):");
        let _ = writeln!(out, "{:>12} {:>10} {:>10}", "", "Calm", "Not Calm");
        for (class, row) in CLASSES.iter().zip(&self.confusion) {
            let _ = writeln!(out, "{:>12} {:>10} {:>10}", class.label(), row[0], row[1]);
        }
        out
    }
}

/// Stratified split, scaler fit on the training part, class-balanced L2
/// logistic regression, evaluation on the held-out part.
pub fn train(set: &TrainingSet, settings: &TrainingSettings) -> Result<(TrainedClassifier, TrainingReport), PipelineError> {
    let calm = set.count(CalmState::Calm);
    let not_calm = set.count(CalmState::NotCalm);
    if calm < 2 || not_calm < 2 {
        return Err(PipelineError::InsufficientData {
            required: 2,
            actual: calm.min(not_calm),
        });
    }
    if set.len() != calm + not_calm {
        return Err(PipelineError::InvalidSettings(
            "training labels must be Calm or Not Calm".into(),
        ));
    }
    let (train_idx, test_idx) = stratified_split(set, settings.test_fraction, settings.seed);
    let (x_train, y_train) = design(set, &train_idx);
    let (x_test, y_test) = design(set, &test_idx);

    let scaler = StandardScaler::fit(&x_train);
    let xs_train = scaler.transform(&x_train);
    let (weights, intercept, iterations) = fit_logistic(&xs_train, &y_train, settings);
    let model = LogisticModel {
        coefficients: weights.to_vec(),
        intercept,
        classes: [CalmState::NotCalm, CalmState::Calm],
        feature_names: vec!["Alpha".into(), "Beta".into(), "AlphaBetaRatio".into()],
    };
    let classifier = TrainedClassifier::new(scaler, model)?;

    let mut confusion = [[0usize; 2]; 2];
    for (row, &y) in x_test.rows().into_iter().zip(y_test.iter()) {
        let predicted = classifier.predict_row(&row.to_vec())?;
        let actual = if y > 0.5 { 0 } else { 1 };
        let predicted = if predicted.state == CalmState::Calm { 0 } else { 1 };
        confusion[actual][predicted] += 1;
    }
    let report = TrainingReport {
        total_samples: set.len(),
        calm_samples: calm,
        not_calm_samples: not_calm,
        train_samples: train_idx.len(),
        test_samples: test_idx.len(),
        accuracy: (confusion[0][0] + confusion[1][1]) as f64 / test_idx.len() as f64,
        per_class: [class_metrics(&confusion, 0), class_metrics(&confusion, 1)],
        confusion,
        iterations,
    };
    log::info!(
        "trained logistic model on {} windows in {} iterations, test accuracy {:.2}%",
        train_idx.len(),
        iterations,
        report.accuracy * 100.0
    );
    Ok((classifier, report))
}

/// Per-class shuffle, then the first `round(n * fraction)` of each class
/// (at least one, at most `n - 1`) go to the test side.
fn stratified_split(set: &TrainingSet, test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();
    for class in CLASSES {
        let mut idx: Vec<usize> = set
            .rows
            .iter()
            .enumerate()
            .filter(|(_, (_, s))| *s == class)
            .map(|(i, _)| i)
            .collect();
        idx.shuffle(&mut rng);
        let n_test = ((idx.len() as f64 * test_fraction).round() as usize).clamp(1, idx.len() - 1);
        test.extend_from_slice(&idx[..n_test]);
        train.extend_from_slice(&idx[n_test..]);
    }
    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

fn design(set: &TrainingSet, idx: &[usize]) -> (Array2<f64>, Array1<f64>) {
    let mut x = Array2::zeros((idx.len(), FeatureVector::DIM));
    let mut y = Array1::zeros(idx.len());
    for (r, &i) in idx.iter().enumerate() {
        let (features, state) = &set.rows[i];
        for (c, v) in features.as_array().iter().enumerate() {
            x[[r, c]] = *v;
        }
        y[r] = if *state == CalmState::Calm { 1.0 } else { 0.0 };
    }
    (x, y)
}

/// Gradient descent on the sample-weighted log loss plus `||w||^2 / (2C)`,
/// normalised by the total sample weight. Weights are `n / (2 * n_class)`.
fn fit_logistic(x: &Array2<f64>, y: &Array1<f64>, settings: &TrainingSettings) -> (Array1<f64>, f64, usize) {
    let n = x.nrows() as f64;
    let positives = y.sum();
    let w_pos = n / (2.0 * positives);
    let w_neg = n / (2.0 * (n - positives));
    let sample_weight = y.mapv(|v| if v > 0.5 { w_pos } else { w_neg });
    let total_weight = sample_weight.sum();
    let l2 = 1.0 / (settings.regularization_c.max(1e-12) * total_weight);

    let mut weights = Array1::<f64>::zeros(x.ncols());
    let mut intercept = 0.0;
    let mut iterations = 0;
    for iter in 0..settings.max_iter {
        iterations = iter + 1;
        let z = x.dot(&weights) + intercept;
        let residual = (z.mapv(sigmoid) - y) * &sample_weight / total_weight;
        let grad_w = x.t().dot(&residual) + &weights * l2;
        let grad_b = residual.sum();
        weights = weights - &grad_w * LEARNING_RATE;
        intercept -= grad_b * LEARNING_RATE;
        let max_grad = grad_w.iter().fold(grad_b.abs(), |m, g| m.max(g.abs()));
        if max_grad < GRADIENT_TOLERANCE {
            break;
        }
    }
    (weights, intercept, iterations)
}

fn class_metrics(confusion: &[[usize; 2]; 2], class: usize) -> ClassMetrics {
    let other = 1 - class;
    let tp = confusion[class][class] as f64;
    let fp = confusion[other][class] as f64;
    let fn_ = confusion[class][other] as f64;
    let ratio = |num: f64, den: f64| if den > 0.0 { num / den } else { 0.0 };
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    ClassMetrics {
        precision,
        recall,
        f1: ratio(2.0 * precision * recall, precision + recall),
        support: confusion[class].iter().sum(),
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    fn session(rng: &mut StdRng, alpha: f64, beta: f64, n: usize) -> Vec<FeatureVector> {
        (0..n)
            .map(|_| {
                let a = alpha * rng.gen_range(0.8..1.2);
                let b = beta * rng.gen_range(0.8..1.2);
                FeatureVector::from_powers(a, b).unwrap()
            })
            .collect()
    }
    #[test]
    fn separable_sessions_train_to_high_accuracy() {
        let mut rng = StdRng::seed_from_u64(1);
        let calm = session(&mut rng, 4e-3, 1e-3, 60);
        let not_calm = session(&mut rng, 1e-3, 4e-3, 30);
        let set = TrainingSet::from_sessions(&calm, &not_calm, 42);
        let (classifier, report) = train(&set, &TrainingSettings::default()).unwrap();
        assert_eq!(report.total_samples, 90);
        assert_eq!(report.test_samples, 18 + 9);
        assert_eq!(report.train_samples + report.test_samples, 90);
        assert!(report.accuracy >= 0.95, "accuracy {}", report.accuracy);
        assert_eq!(report.per_class[1].support, 9);
        let calm_row = FeatureVector::from_powers(4e-3, 1e-3).unwrap();
        let out = crate::classify::StateClassifier::classify(&classifier, &calm_row).unwrap();
        assert_eq!(out.state, CalmState::Calm);
        assert!(out.confidence > 0.5);
        assert!(report.render().contains("Not Calm"));
    }
    #[test]
    fn split_is_stratified_and_disjoint() {
        let mut rng = StdRng::seed_from_u64(2);
        let set = TrainingSet::from_sessions(
            &session(&mut rng, 2.0, 1.0, 20),
            &session(&mut rng, 1.0, 2.0, 10),
            42,
        );
        let (train_idx, test_idx) = stratified_split(&set, 0.3, 42);
        assert_eq!(test_idx.len(), 6 + 3);
        assert_eq!(train_idx.len(), 21);
        assert!(train_idx.iter().all(|i| !test_idx.contains(i)));
        let test_calm = test_idx
            .iter()
            .filter(|i| set.rows[**i].1 == CalmState::Calm)
            .count();
        assert_eq!(test_calm, 6);
    }
    #[test]
    fn single_class_cannot_train() {
        let mut rng = StdRng::seed_from_u64(3);
        let set = TrainingSet::from_sessions(&session(&mut rng, 2.0, 1.0, 20), &[], 42);
        assert!(matches!(
            train(&set, &TrainingSettings::default()),
            Err(PipelineError::InsufficientData { .. })
        ));
    }
    #[test]
    fn metrics_from_confusion() {
        let m = class_metrics(&[[8, 2], [1, 9]], 0);
        assert!((m.precision - 8.0 / 9.0).abs() < 1e-12);
        assert!((m.recall - 0.8).abs() < 1e-12);
        assert_eq!(m.support, 10);
    }
}
