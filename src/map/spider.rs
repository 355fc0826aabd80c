use crate::map::markers::MarkerId;

// Fan-out geometry in screen pixels: small groups spread onto a circle,
// large ones onto an archimedean spiral.
const FOOT_SEPARATION: f32 = 25.0;
const MIN_CIRCLE_RADIUS: f32 = 22.0;
const SPIRAL_SWITCHOVER: usize = 9;
const SPIRAL_LENGTH_START: f32 = 14.0;
const SPIRAL_LENGTH_FACTOR: f32 = 5.0;
const SPIRAL_FOOT_SEPARATION: f32 = 28.0;

/// Spreads the members of one coordinate-sharing marker group apart so they
/// can be clicked individually. One instance per `grouped_points`
/// sub-collection; markers register at build time and the group expands on
/// click, collapsing again on the next viewport change.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Spiderfier {
    members: Vec<MarkerId>,
    expanded: bool,
}

impl Spiderfier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, marker: MarkerId) {
        self.members.push(marker);
    }

    pub fn members(&self) -> &[MarkerId] {
        &self.members
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn expand(&mut self) {
        self.expanded = true;
    }

    pub fn collapse(&mut self) {
        self.expanded = false;
    }

    /// Screen-space offset of one member from the shared anchor while the
    /// group is expanded; `None` when collapsed or for foreign markers.
    pub fn offset_of(&self, marker: MarkerId) -> Option<egui::Vec2> {
        if !self.expanded {
            return None;
        }
        let position = self.members.iter().position(|&m| m == marker)?;
        Some(leg_offsets(self.members.len())[position])
    }
}

/// Fan-out offsets for a group of `count` overlapping markers.
pub fn leg_offsets(count: usize) -> Vec<egui::Vec2> {
    if count <= SPIRAL_SWITCHOVER {
        circle_offsets(count)
    } else {
        spiral_offsets(count)
    }
}

fn circle_offsets(count: usize) -> Vec<egui::Vec2> {
    let radius = (FOOT_SEPARATION * count as f32 / std::f32::consts::TAU).max(MIN_CIRCLE_RADIUS);
    let step = std::f32::consts::TAU / count as f32;
    (0..count)
        .map(|i| {
            let angle = std::f32::consts::FRAC_PI_2 + i as f32 * step;
            egui::vec2(radius * angle.cos(), radius * angle.sin())
        })
        .collect()
}

fn spiral_offsets(count: usize) -> Vec<egui::Vec2> {
    let mut leg_length = SPIRAL_LENGTH_START;
    let mut angle = 0.0_f32;
    (0..count)
        .map(|i| {
            angle += SPIRAL_FOOT_SEPARATION / leg_length + i as f32 * 0.0005;
            let offset = egui::vec2(leg_length * angle.cos(), leg_length * angle.sin());
            leg_length += std::f32::consts::TAU * SPIRAL_LENGTH_FACTOR / angle;
            offset
        })
        .collect()
}
