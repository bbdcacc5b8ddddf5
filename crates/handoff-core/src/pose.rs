//! Hand pose - 21 landmarks per detected hand, or an explicit absence
//!
//! Both inference back ends produce the same [`Pose`] type, so the pipeline
//! never needs to know which back end handled a frame.

/// Number of landmarks in a hand pose
pub const LANDMARK_COUNT: usize = 21;

/// Number of scalar values in a flattened pose (21 × [x, y, z])
pub const LANDMARK_VALUES: usize = LANDMARK_COUNT * 3;

/// Names for the hand landmarks, in model output order.
///
/// - **CMC**: carpometacarpal joint, the lowest joint of the thumb
/// - **MCP**: metacarpophalangeal joint, the knuckle
/// - **PIP** / **IP**: (proximal) interphalangeal joint
/// - **DIP**: distal interphalangeal joint
/// - **Tip**: the finger tip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandLandmark {
    Wrist,
    ThumbCmc,
    ThumbMcp,
    ThumbIp,
    ThumbTip,
    IndexFingerMcp,
    IndexFingerPip,
    IndexFingerDip,
    IndexFingerTip,
    MiddleFingerMcp,
    MiddleFingerPip,
    MiddleFingerDip,
    MiddleFingerTip,
    RingFingerMcp,
    RingFingerPip,
    RingFingerDip,
    RingFingerTip,
    PinkyMcp,
    PinkyPip,
    PinkyDip,
    PinkyTip,
}

impl HandLandmark {
    /// All landmarks in order
    pub fn all() -> &'static [HandLandmark] {
        use HandLandmark::*;
        &[
            Wrist,
            ThumbCmc,
            ThumbMcp,
            ThumbIp,
            ThumbTip,
            IndexFingerMcp,
            IndexFingerPip,
            IndexFingerDip,
            IndexFingerTip,
            MiddleFingerMcp,
            MiddleFingerPip,
            MiddleFingerDip,
            MiddleFingerTip,
            RingFingerMcp,
            RingFingerPip,
            RingFingerDip,
            RingFingerTip,
            PinkyMcp,
            PinkyPip,
            PinkyDip,
            PinkyTip,
        ]
    }

    /// Position of this landmark in the model output
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Landmark for an output index
    pub fn from_index(index: usize) -> Option<Self> {
        Self::all().get(index).copied()
    }
}

/// Bone segments between landmarks, for overlay renderers.
pub const HAND_CONNECTIONS: &[(HandLandmark, HandLandmark)] = {
    use HandLandmark::*;
    &[
        // Palm
        (Wrist, ThumbCmc),
        (ThumbCmc, IndexFingerMcp),
        (IndexFingerMcp, MiddleFingerMcp),
        (MiddleFingerMcp, RingFingerMcp),
        (RingFingerMcp, PinkyMcp),
        (PinkyMcp, Wrist),
        // Thumb
        (ThumbCmc, ThumbMcp),
        (ThumbMcp, ThumbIp),
        (ThumbIp, ThumbTip),
        // Index
        (IndexFingerMcp, IndexFingerPip),
        (IndexFingerPip, IndexFingerDip),
        (IndexFingerDip, IndexFingerTip),
        // Middle
        (MiddleFingerMcp, MiddleFingerPip),
        (MiddleFingerPip, MiddleFingerDip),
        (MiddleFingerDip, MiddleFingerTip),
        // Ring
        (RingFingerMcp, RingFingerPip),
        (RingFingerPip, RingFingerDip),
        (RingFingerDip, RingFingerTip),
        // Pinky
        (PinkyMcp, PinkyPip),
        (PinkyPip, PinkyDip),
        (PinkyDip, PinkyTip),
    ]
};

/// A landmark position normalized to the frame (x, y in [0, 1]; z relative depth)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Distance to another landmark
    pub fn distance(&self, other: &Landmark) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Project onto a frame of the given pixel size
    pub fn to_pixel(&self, width: u32, height: u32) -> (i32, i32) {
        (
            (self.x * width as f32) as i32,
            (self.y * height as f32) as i32,
        )
    }
}

/// The 21 landmarks of one detected hand
#[derive(Debug, Clone, PartialEq)]
pub struct HandPose {
    landmarks: [Landmark; LANDMARK_COUNT],
}

impl HandPose {
    pub fn new(landmarks: [Landmark; LANDMARK_COUNT]) -> Self {
        Self { landmarks }
    }

    /// Build from a flat `[x0, y0, z0, x1, ...]` slice.
    ///
    /// Returns `None` unless the slice holds exactly [`LANDMARK_VALUES`] values.
    pub fn from_values(values: &[f32]) -> Option<Self> {
        if values.len() != LANDMARK_VALUES {
            return None;
        }

        let mut landmarks = [Landmark::default(); LANDMARK_COUNT];
        for (out, chunk) in landmarks.iter_mut().zip(values.chunks_exact(3)) {
            *out = Landmark::new(chunk[0], chunk[1], chunk[2]);
        }
        Some(Self { landmarks })
    }

    /// Flatten into `[x0, y0, z0, x1, ...]`
    pub fn to_values(&self) -> [f32; LANDMARK_VALUES] {
        let mut values = [0.0f32; LANDMARK_VALUES];
        for (chunk, lm) in values.chunks_exact_mut(3).zip(self.landmarks.iter()) {
            chunk[0] = lm.x;
            chunk[1] = lm.y;
            chunk[2] = lm.z;
        }
        values
    }

    pub fn landmarks(&self) -> &[Landmark; LANDMARK_COUNT] {
        &self.landmarks
    }

    #[inline]
    pub fn landmark(&self, which: HandLandmark) -> Landmark {
        self.landmarks[which.index()]
    }

    /// Pixel coordinates of every landmark for a frame of the given size
    pub fn to_pixels(&self, width: u32, height: u32) -> Vec<(i32, i32)> {
        self.landmarks
            .iter()
            .map(|lm| lm.to_pixel(width, height))
            .collect()
    }

    /// Center of the palm (mean of wrist, thumb CMC and the four MCP knuckles)
    pub fn palm_center(&self) -> Landmark {
        use HandLandmark::*;
        let palm = [
            Wrist,
            ThumbCmc,
            IndexFingerMcp,
            MiddleFingerMcp,
            RingFingerMcp,
            PinkyMcp,
        ];
        let (mut x, mut y, mut z) = (0.0, 0.0, 0.0);
        for lm in palm.iter().map(|p| self.landmark(*p)) {
            x += lm.x;
            y += lm.y;
            z += lm.z;
        }
        let n = palm.len() as f32;
        Landmark::new(x / n, y / n, z / n)
    }
}

/// Result of hand detection on one frame
#[derive(Debug, Clone, PartialEq)]
pub enum Pose {
    /// No hand visible in the frame
    Absent,
    /// One detected hand
    Hand(HandPose),
}

impl Pose {
    pub fn is_present(&self) -> bool {
        matches!(self, Pose::Hand(_))
    }

    pub fn hand(&self) -> Option<&HandPose> {
        match self {
            Pose::Hand(hand) => Some(hand),
            Pose::Absent => None,
        }
    }

    pub fn landmark(&self, which: HandLandmark) -> Option<Landmark> {
        self.hand().map(|h| h.landmark(which))
    }
}

impl From<HandPose> for Pose {
    fn from(hand: HandPose) -> Self {
        Pose::Hand(hand)
    }
}
