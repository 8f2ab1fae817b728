//! The default secret-word list for evaluation rollouts.

/// Everyday nouns spanning animals, foods, tools, vehicles, and household
/// objects, mirroring the spread of the recorded-game dataset.
pub const DEFAULT_WORDS: &[&str] = &[
    "airplane",
    "apple",
    "backpack",
    "banana",
    "bicycle",
    "boat",
    "book",
    "bottle",
    "bridge",
    "butterfly",
    "camera",
    "candle",
    "car",
    "carrot",
    "cat",
    "chair",
    "clock",
    "cloud",
    "computer",
    "dinosaur",
    "dog",
    "dolphin",
    "drum",
    "eagle",
    "elephant",
    "fork",
    "guitar",
    "hammer",
    "hat",
    "horse",
    "island",
    "kangaroo",
    "key",
    "kite",
    "ladder",
    "lamp",
    "lion",
    "mirror",
    "mountain",
    "mushroom",
    "ocean",
    "owl",
    "pencil",
    "piano",
    "pillow",
    "pizza",
    "potato",
    "rabbit",
    "refrigerator",
    "river",
    "robot",
    "rocket",
    "scissors",
    "shark",
    "shoe",
    "snake",
    "spider",
    "spoon",
    "strawberry",
    "telescope",
    "television",
    "tiger",
    "train",
    "tree",
    "umbrella",
    "violin",
    "whale",
    "window",
];

/// The default word list as owned strings.
pub fn default_word_list() -> Vec<String> {
    DEFAULT_WORDS.iter().map(|w| w.to_string()).collect()
}
