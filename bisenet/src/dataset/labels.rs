//! Cityscapes label definitions.

/// Label value excluded from training and evaluation.
pub const IGNORE_INDEX: u8 = 255;

/// Names of the 19 evaluated classes, indexed by train id.
pub const CLASS_NAMES: [&str; 19] = [
    "road",
    "sidewalk",
    "building",
    "wall",
    "fence",
    "pole",
    "traffic light",
    "traffic sign",
    "vegetation",
    "terrain",
    "sky",
    "person",
    "rider",
    "car",
    "truck",
    "bus",
    "train",
    "motorcycle",
    "bicycle",
];

const I: u8 = IGNORE_INDEX;

// Indexed by the `labelIds` value of gtFine annotations.
const LABEL_TO_TRAIN: [u8; 34] = [
    I, I, I, I, I, I, I, // unlabeled .. ground
    0, 1, // road, sidewalk
    I, I, // parking, rail track
    2, 3, 4, // building, wall, fence
    I, I, I, // guard rail, bridge, tunnel
    5, I, // pole, polegroup
    6, 7, 8, 9, 10, 11, 12, 13, 14, 15, // traffic light .. truck
    I, I, // caravan, trailer
    16, 17, 18, // train, motorcycle, bicycle
];

/// Maps a Cityscapes label id to its train id; unknown ids are ignored.
pub fn label_id_to_train_id(label_id: u8) -> u8 {
    LABEL_TO_TRAIN
        .get(label_id as usize)
        .copied()
        .unwrap_or(IGNORE_INDEX)
}
