// ============================================================
// Layer 5 - Caption Evaluation (BLEU-4)
// ============================================================
// After an epoch the model captions a handful of held-out images
// greedily and the result is scored against all five reference
// captions with corpus-level BLEU-4:
//
//   p_n  = Σ clipped n-gram matches / Σ candidate n-grams   (n = 1..4)
//   BP   = 1                  if c > r
//          exp(1 - r / c)     otherwise
//   BLEU = BP * exp(mean(ln p_n))
//
// c is the total candidate length, r the sum of the reference
// lengths closest to each candidate. Any p_n of zero gives 0.
//
// Scoring only reads the model; nothing here feeds back into
// training.

use std::collections::HashMap;

use burn::{data::dataset::Dataset, prelude::*};

use crate::data::{dataset::CaptionItem, vocabulary::Vocabulary};
use crate::domain::{caption::CaptionExample, error::CaptionError};
use crate::ml::model::CaptionModel;

const MAX_ORDER: usize = 4;

/// One generated caption and the references it is scored against.
#[derive(Debug, Clone)]
pub struct ScoredCaption {
    pub candidate:  Vec<String>,
    pub references: Vec<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct EvalReport {
    pub bleu:    f64,
    pub images:  usize,
    /// First evaluated image, for qualitative inspection
    pub example: Option<CaptionExample>,
}

fn ngram_counts(tokens: &[String], n: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    if tokens.len() >= n {
        for gram in tokens.windows(n) {
            *counts.entry(gram).or_insert(0) += 1;
        }
    }
    counts
}

/// Corpus BLEU-4 with uniform weights. Returns a value in [0, 1].
pub fn corpus_bleu(samples: &[ScoredCaption]) -> f64 {
    let mut matches = [0usize; MAX_ORDER];
    let mut totals  = [0usize; MAX_ORDER];
    let mut cand_len = 0usize;
    let mut ref_len  = 0usize;

    for sample in samples {
        let c = sample.candidate.len();
        cand_len += c;
        // Closest reference length, shorter one on ties
        ref_len += sample
            .references
            .iter()
            .map(|r| r.len())
            .min_by_key(|&r| (r.abs_diff(c), r))
            .unwrap_or(0);

        for n in 1..=MAX_ORDER {
            let cand = ngram_counts(&sample.candidate, n);
            let mut max_ref: HashMap<&[String], usize> = HashMap::new();
            for reference in &sample.references {
                for (gram, count) in ngram_counts(reference, n) {
                    let slot = max_ref.entry(gram).or_insert(0);
                    *slot = (*slot).max(count);
                }
            }
            for (gram, count) in cand {
                matches[n - 1] += count.min(max_ref.get(gram).copied().unwrap_or(0));
                totals[n - 1]  += count;
            }
        }
    }

    if cand_len == 0 || matches.iter().any(|&m| m == 0) {
        return 0.0;
    }

    let log_precision = matches
        .iter()
        .zip(&totals)
        .map(|(&m, &t)| (m as f64 / t as f64).ln())
        .sum::<f64>()
        / MAX_ORDER as f64;

    let brevity = if cand_len > ref_len {
        1.0
    } else {
        (1.0 - ref_len as f64 / cand_len as f64).exp()
    };
    brevity * log_precision.exp()
}

fn words(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_string).collect()
}

/// Caption up to `max_images` distinct images of `test_set` and score them.
///
/// `test_set` must list each image's captions next to each other, which
/// is how the splitter lays out test indices.
pub fn evaluate<B: Backend, D: Dataset<CaptionItem> + ?Sized>(
    model:      &CaptionModel<B>,
    test_set:   &D,
    vocab:      &Vocabulary,
    max_images: usize,
    device:     &B::Device,
) -> Result<EvalReport, CaptionError> {
    let mut samples: Vec<ScoredCaption> = Vec::new();
    let mut example = None;
    let mut index   = 0;

    while samples.len() < max_images && index < test_set.len() {
        let Some(first) = test_set.get(index) else {
            tracing::warn!("Skipping unreadable test entry {index}");
            index += 1;
            continue;
        };

        // Gather the rest of this image's references
        let mut references = vec![vocab.ids_to_text(&first.caption)];
        index += 1;
        while let Some(next) = test_set.get(index) {
            if next.image_id != first.image_id {
                break;
            }
            references.push(vocab.ids_to_text(&next.caption));
            index += 1;
        }

        let generated = model.infer(first.image.to_batch::<B>(device))?;
        let text      = vocab.ids_to_text(&generated.token_ids);

        if example.is_none() {
            example = Some(CaptionExample {
                image_id:  first.image_id.clone(),
                reference: references[0].clone(),
                generated: text.clone(),
            });
        }
        samples.push(ScoredCaption {
            candidate:  words(&text),
            references: references.iter().map(|r| words(r)).collect(),
        });
    }

    Ok(EvalReport { bleu: corpus_bleu(&samples), images: samples.len(), example })
}
