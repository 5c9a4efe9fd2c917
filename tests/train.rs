use std::sync::{Arc, Mutex};

use wordvec::{
    Error, NetworkType, OutputLayer, Stage, Trainer, TrainerConfig, VectorStore,
};

/// A small corpus with some structure: animals and fruits appear in
/// different contexts.
fn corpus() -> Vec<Vec<String>> {
    let templates = [
        "the cat chased the dog",
        "the dog chased the cat",
        "a cat and a dog play",
        "she ate an apple and a pear",
        "he ate a pear and an apple",
        "an apple is sweet and a pear is sweet",
    ];
    (0..50)
        .flat_map(|_| templates.iter())
        .map(|s| s.split(' ').map(str::to_string).collect())
        .collect()
}

fn config(network: NetworkType, output: OutputLayer) -> TrainerConfig {
    TrainerConfig {
        network,
        output,
        layer_size: 16,
        window: 3,
        iterations: 2,
        threads: 1,
        min_count: 1,
        ..TrainerConfig::default()
    }
}

fn train(config: TrainerConfig) -> VectorStore {
    Trainer::new(config).unwrap().train(&corpus()).unwrap()
}

#[test]
fn single_thread_cbow_hs_is_deterministic() {
    let config = config(NetworkType::Cbow, OutputLayer::HierarchicalSoftmax);
    let a = train(config.clone());
    let b = train(config);
    assert_eq!(a, b);
}

#[test]
fn single_thread_skip_gram_ns_is_deterministic() {
    let config = config(
        NetworkType::SkipGram,
        OutputLayer::NegativeSampling { samples: 5 },
    );
    let a = train(config.clone());
    let b = train(config);
    assert_eq!(a, b);
}

#[test]
fn every_combination_produces_finite_vectors() {
    for network in [NetworkType::Cbow, NetworkType::SkipGram] {
        for output in [
            OutputLayer::HierarchicalSoftmax,
            OutputLayer::NegativeSampling { samples: 3 },
        ] {
            let store = train(TrainerConfig {
                threads: 4,
                ..config(network, output)
            });
            assert_eq!(store.layer_size(), 16);
            assert_eq!(store.word(0), "a");
            assert!(store.contains("pear"));
            assert!(store.embeddings().iter().all(|x| x.is_finite()));
            assert!(store.embeddings().iter().any(|&x| x != 0.0));
        }
    }
}

#[test]
fn min_count_drops_rare_words() {
    let mut sentences = corpus();
    sentences.push(vec!["zebra".to_string(), "cat".to_string()]);
    let trainer = Trainer::new(TrainerConfig {
        min_count: 2,
        ..config(NetworkType::Cbow, OutputLayer::HierarchicalSoftmax)
    })
    .unwrap();
    let store = trainer.train(&sentences).unwrap();
    assert!(!store.contains("zebra"));
    assert!(store.contains("cat"));
}

#[test]
fn precomputed_vocabulary_is_used() {
    let counts = [("cat", 10), ("dog", 7), ("unicorn", 3)]
        .into_iter()
        .map(|(w, c)| (w.to_string(), c))
        .collect();
    let trainer = Trainer::new(TrainerConfig {
        vocab: Some(counts),
        ..config(NetworkType::SkipGram, OutputLayer::HierarchicalSoftmax)
    })
    .unwrap();
    let store = trainer.train(&corpus()).unwrap();
    assert_eq!(store.words(), ["cat", "dog", "unicorn"]);
}

#[test]
fn empty_vocabulary_is_an_error() {
    let trainer = Trainer::new(TrainerConfig {
        min_count: 1_000_000,
        ..TrainerConfig::default()
    })
    .unwrap();
    assert!(matches!(trainer.train(&corpus()), Err(Error::Config(_))));
}

fn recording_trainer(cancel_at: Stage) -> (Trainer, Arc<Mutex<Vec<Stage>>>) {
    let trainer = Trainer::new(config(
        NetworkType::Cbow,
        OutputLayer::HierarchicalSoftmax,
    ))
    .unwrap();
    let cancel = trainer.cancel_token();
    let seen = Arc::new(Mutex::new(vec![]));
    let log = seen.clone();
    let trainer = trainer.with_listener(move |stage: Stage, _progress: f64| {
        let mut log = log.lock().unwrap();
        if log.last() != Some(&stage) {
            log.push(stage);
        }
        if stage == cancel_at {
            cancel.cancel();
        }
    });
    (trainer, seen)
}

#[test]
fn stages_are_reported_in_order() {
    let trainer = Trainer::new(config(
        NetworkType::Cbow,
        OutputLayer::HierarchicalSoftmax,
    ))
    .unwrap();
    let seen = Arc::new(Mutex::new(vec![]));
    let log = seen.clone();
    let trainer = trainer.with_listener(move |stage: Stage, progress: f64| {
        assert!((0.0..=1.0).contains(&progress));
        let mut log = log.lock().unwrap();
        if log.last() != Some(&stage) {
            log.push(stage);
        }
    });
    trainer.train(&corpus()).unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        [
            Stage::AcquireVocab,
            Stage::FilterSortVocab,
            Stage::BuildHuffman,
            Stage::TrainNetwork,
        ]
    );
}

#[test]
fn cancel_while_building_huffman_tree() {
    let (trainer, seen) = recording_trainer(Stage::BuildHuffman);
    let err = trainer.train(&corpus()).unwrap_err();
    assert!(matches!(err, Error::Interrupted));
    assert!(!seen.lock().unwrap().contains(&Stage::TrainNetwork));
}

#[test]
fn cancel_while_training() {
    let (trainer, seen) = recording_trainer(Stage::TrainNetwork);
    let err = trainer.train(&corpus()).unwrap_err();
    assert!(matches!(err, Error::Interrupted));
    assert_eq!(seen.lock().unwrap().last(), Some(&Stage::TrainNetwork));
}

#[test]
fn cancellation_is_permanent() {
    let trainer = Trainer::new(config(
        NetworkType::Cbow,
        OutputLayer::HierarchicalSoftmax,
    ))
    .unwrap();
    trainer.cancel_token().cancel();
    for _ in 0..2 {
        assert!(matches!(trainer.train(&corpus()), Err(Error::Interrupted)));
    }
    let fresh = Trainer::new(trainer.config().clone()).unwrap();
    assert!(!fresh.cancel_token().is_canceled());
    fresh.train(&corpus()).unwrap();
}
