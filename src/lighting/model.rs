// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::time::Duration;

use tracing::{debug, info};

use super::{
    color::{self, Color},
    error::PatchError,
    types::{ChannelMode, Group, Members, Projector, ProjectorId, ProjectorState, Target},
};

/// A DMX universe is 512 channels.
pub const UNIVERSE_SIZE: usize = 512;

/// Auto-patch places projectors on slots this many channels apart.
pub const PATCH_STRIDE: u16 = 10;

/// The projectors of the reference rig, in patch order.
pub const REFERENCE_RIG: [(Group, usize); 6] = [
    (Group::Face, 4),
    (Group::Douche1, 3),
    (Group::Douche2, 3),
    (Group::Douche3, 3),
    (Group::Lat, 2),
    (Group::Contre, 6),
];

/// The in-memory state of every patched projector.
pub struct FixtureModel {
    /// Projectors, kept sorted by address.
    projectors: Vec<Projector>,
    /// The next identifier to hand out.
    next_id: u32,
    /// When set, every channel is output as zero without losing projector state.
    blackout: bool,
}

impl Default for FixtureModel {
    fn default() -> Self {
        Self::new()
    }
}

impl FixtureModel {
    /// Creates an empty model.
    pub fn new() -> FixtureModel {
        FixtureModel {
            projectors: Vec::new(),
            next_id: 0,
            blackout: false,
        }
    }

    /// Creates a model with the reference rig auto-patched at the default channel mode.
    pub fn reference_rig() -> Result<FixtureModel, PatchError> {
        let mut model = FixtureModel::new();
        for (group, count) in REFERENCE_RIG {
            for _ in 0..count {
                model.patch(group, ChannelMode::default())?;
            }
        }
        Ok(model)
    }

    /// Patches a projector at the first free slot on the patch stride.
    pub fn patch(&mut self, group: Group, mode: ChannelMode) -> Result<ProjectorId, PatchError> {
        let width = mode.width();
        let address = (1..=UNIVERSE_SIZE as u16)
            .step_by(usize::from(PATCH_STRIDE))
            .find(|address| self.check_range(*address, width).is_ok())
            .ok_or(PatchError::UniverseFull(width))?;

        self.insert(group, mode, address)
    }

    /// Patches a projector at an explicit address.
    pub fn patch_at(
        &mut self,
        group: Group,
        mode: ChannelMode,
        address: u16,
    ) -> Result<ProjectorId, PatchError> {
        self.check_range(address, mode.width())?;
        self.insert(group, mode, address)
    }

    /// Removes a projector from the patch.
    pub fn unpatch(&mut self, id: ProjectorId) -> Result<Projector, PatchError> {
        let index = self
            .projectors
            .iter()
            .position(|projector| projector.id == id)
            .ok_or(PatchError::UnknownProjector(id))?;
        let projector = self.projectors.remove(index);
        info!(projector = %id, address = projector.address, "Projector unpatched.");
        Ok(projector)
    }

    fn check_range(&self, address: u16, width: u16) -> Result<(), PatchError> {
        let last = u32::from(address) + u32::from(width) - 1;
        if address == 0 || last > UNIVERSE_SIZE as u32 {
            return Err(PatchError::OutOfRange { address, last });
        }

        match self
            .projectors
            .iter()
            .find(|projector| projector.overlaps(address, width))
        {
            Some(existing) => Err(PatchError::Overlap {
                address,
                last: last as u16,
                existing: existing.id,
            }),
            None => Ok(()),
        }
    }

    fn insert(
        &mut self,
        group: Group,
        mode: ChannelMode,
        address: u16,
    ) -> Result<ProjectorId, PatchError> {
        let id = ProjectorId(self.next_id);
        self.next_id += 1;

        let index = self
            .projectors
            .partition_point(|projector| projector.address < address);
        self.projectors
            .insert(index, Projector::new(id, group, address, mode));

        debug!(projector = %id, %group, address, %mode, "Projector patched.");
        Ok(id)
    }

    /// Applies `apply` to every projector in the target. Returns the number affected.
    fn update<F>(&mut self, target: Target, mut apply: F) -> usize
    where
        F: FnMut(&mut Projector),
    {
        let mut count = 0;
        for projector in self
            .projectors
            .iter_mut()
            .filter(|projector| target.includes(projector.id, projector.group))
        {
            apply(projector);
            count += 1;
        }
        count
    }

    /// Sets the base colour of every projector in the target. Returns the number affected.
    pub fn set_color(&mut self, target: Target, color: Color) -> usize {
        self.update(target, |projector| projector.color = color)
    }

    /// Sets the level of every projector in the target, clamped to 0-100.
    pub fn set_level(&mut self, target: Target, level: u8) -> usize {
        let level = level.min(100);
        self.update(target, |projector| projector.level = level)
    }

    /// Sets the colour of the nth member of a group, counted in address order.
    pub fn set_member_color(&mut self, group: Group, member: usize, color: Color) -> usize {
        match self
            .projectors
            .iter_mut()
            .filter(|projector| projector.group == group)
            .nth(member)
        {
            Some(projector) => {
                projector.color = color;
                1
            }
            None => 0,
        }
    }

    pub fn set_mute(&mut self, target: Target, muted: bool) -> usize {
        self.update(target, |projector| projector.muted = muted)
    }

    pub fn toggle_mute(&mut self, target: Target) -> usize {
        self.update(target, |projector| projector.muted = !projector.muted)
    }

    /// Sets the strobe speed, clamped to 0-100. Zero turns the strobe off.
    pub fn set_strobe(&mut self, target: Target, speed: u8) -> usize {
        let speed = speed.min(100);
        self.update(target, |projector| projector.strobe = speed)
    }

    pub fn set_blackout(&mut self, blackout: bool) {
        self.blackout = blackout;
    }

    pub fn blackout(&self) -> bool {
        self.blackout
    }

    /// Renders the whole universe, in ascending address order, with unpatched channels at zero.
    pub fn snapshot_all(&self) -> [u8; UNIVERSE_SIZE] {
        self.snapshot_at(Duration::ZERO)
    }

    /// Renders the universe at a point of the emitter clock, which drives the blink of
    /// projectors that strobe without a strobe channel.
    pub fn snapshot_at(&self, clock: Duration) -> [u8; UNIVERSE_SIZE] {
        let mut buffer = [0u8; UNIVERSE_SIZE];
        if self.blackout {
            return buffer;
        }

        for projector in self.projectors.iter() {
            let start = usize::from(projector.address) - 1;
            color::encode(projector, clock, &mut buffer[start..]);
        }
        buffer
    }

    /// Gets a projector by identifier.
    pub fn get(&self, id: ProjectorId) -> Option<&Projector> {
        self.projectors.iter().find(|projector| projector.id == id)
    }

    /// Gets all projectors in address order.
    pub fn projectors(&self) -> &[Projector] {
        &self.projectors
    }

    /// The patched projectors and their groups, in address order.
    pub fn members(&self) -> Members {
        Members::new(
            self.projectors
                .iter()
                .map(|projector| (projector.id, projector.group))
                .collect(),
        )
    }

    /// The read-only projection handed to presentation layers.
    pub fn projection(&self) -> Vec<ProjectorState> {
        self.projectors.iter().map(Projector::state).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn six_groups() -> (FixtureModel, Vec<ProjectorId>) {
        let mut model = FixtureModel::new();
        let ids = Group::ALL
            .iter()
            .map(|group| model.patch(*group, ChannelMode::Five).unwrap())
            .collect();
        (model, ids)
    }

    #[test]
    fn test_auto_patch_stride() {
        let (model, _) = six_groups();
        let addresses: Vec<u16> = model.projectors().iter().map(|p| p.address).collect();
        assert_eq!(vec![1, 11, 21, 31, 41, 51], addresses);
    }

    #[test]
    fn test_auto_patch_skips_occupied_slots() {
        let mut model = FixtureModel::new();
        model.patch_at(Group::Face, ChannelMode::Six, 4).unwrap();
        // Five channels from slot 1 run into channels 4-9, three channels fit.
        let id = model.patch(Group::Lat, ChannelMode::Five).unwrap();
        assert_eq!(11, model.get(id).unwrap().address);
        let id = model.patch(Group::Lat, ChannelMode::Three).unwrap();
        assert_eq!(1, model.get(id).unwrap().address);
    }

    #[test]
    fn test_patch_errors_leave_model_unchanged() {
        let (mut model, _) = six_groups();
        let before = model.projection();

        assert!(matches!(
            model.patch_at(Group::Face, ChannelMode::Five, 13),
            Err(PatchError::Overlap { address: 13, last: 17, .. })
        ));
        assert!(matches!(
            model.patch_at(Group::Face, ChannelMode::Five, 510),
            Err(PatchError::OutOfRange { .. })
        ));
        assert!(matches!(
            model.patch_at(Group::Face, ChannelMode::Five, 0),
            Err(PatchError::OutOfRange { .. })
        ));
        assert!(matches!(
            model.unpatch(ProjectorId(99)),
            Err(PatchError::UnknownProjector(ProjectorId(99)))
        ));
        assert_eq!(before, model.projection());
    }

    #[test]
    fn test_patches_never_overlap() {
        // Mix explicit and automatic patches in many orders and check all ranges are disjoint.
        let modes = [
            ChannelMode::Three,
            ChannelMode::Four,
            ChannelMode::Five,
            ChannelMode::Six,
        ];
        for seed in 0..64usize {
            let mut model = FixtureModel::new();
            for step in 0..80usize {
                let mode = modes[(seed + step * 7) % modes.len()];
                let group = Group::ALL[(seed + step) % Group::ALL.len()];
                let _ = if (seed * 31 + step) % 3 == 0 {
                    model.patch_at(group, mode, ((seed * 13 + step * 17) % 512) as u16 + 1)
                } else {
                    model.patch(group, mode)
                };
            }

            let projectors = model.projectors();
            for (i, a) in projectors.iter().enumerate() {
                assert!(a.last_channel() as usize <= UNIVERSE_SIZE);
                for b in projectors.iter().skip(i + 1) {
                    assert!(
                        !a.overlaps(b.address, b.mode.width()),
                        "{:?} overlaps {:?}",
                        a,
                        b
                    );
                }
            }
        }
    }

    #[test]
    fn test_universe_full() {
        let mut model = FixtureModel::new();
        for _ in 0..51 {
            model.patch(Group::Contre, ChannelMode::Six).unwrap();
        }
        assert_eq!(
            Err(PatchError::UniverseFull(6)),
            model.patch(Group::Contre, ChannelMode::Six)
        );
        // The last stride slot, 511, is too short for any personality.
        assert_eq!(
            Err(PatchError::UniverseFull(3)),
            model.patch(Group::Contre, ChannelMode::Three)
        );
    }

    #[test]
    fn test_snapshot_length() {
        assert_eq!(UNIVERSE_SIZE, FixtureModel::new().snapshot_all().len());
        let model = FixtureModel::reference_rig().unwrap();
        assert_eq!(21, model.projectors().len());
        assert_eq!(UNIVERSE_SIZE, model.snapshot_all().len());
    }

    #[test]
    fn test_set_color_on_group() {
        let (mut model, _) = six_groups();
        model.set_level(Target::All, 100);
        let before = model.snapshot_all();

        assert_eq!(1, model.set_color(Group::Face.into(), Color::RED));
        let after = model.snapshot_all();

        // face is patched at address 1: R, G, B, dimmer, strobe.
        assert_eq!([255, 0, 0, 255, 0], after[0..5]);
        assert_eq!(before[5..], after[5..]);
    }

    #[test]
    fn test_broadcast_and_clamping() {
        let mut model = FixtureModel::reference_rig().unwrap();
        assert_eq!(4, model.set_level(Group::Face.into(), 250));
        assert!(model
            .projectors()
            .iter()
            .filter(|p| p.group == Group::Face)
            .all(|p| p.level == 100));
        assert_eq!(6, model.set_strobe(Group::Contre.into(), 180));
        assert_eq!(21, model.set_mute(Target::All, true));
        assert_eq!([0u8; UNIVERSE_SIZE], model.snapshot_all());
        assert_eq!(0, model.set_color(Target::Projector(ProjectorId(77)), Color::RED));
    }

    #[test]
    fn test_blackout_preserves_state() {
        let (mut model, ids) = six_groups();
        model.set_color(Target::All, Color::WHITE);
        model.set_level(Target::All, 100);
        let lit = model.snapshot_all();

        model.set_blackout(true);
        assert_eq!([0u8; UNIVERSE_SIZE], model.snapshot_all());
        assert_eq!(Color::WHITE, model.get(ids[0]).unwrap().color);

        model.set_blackout(false);
        assert_eq!(lit, model.snapshot_all());
    }

    #[test]
    fn test_set_member_color() {
        let mut model = FixtureModel::reference_rig().unwrap();
        assert_eq!(1, model.set_member_color(Group::Lat, 1, Color::RED));
        assert_eq!(0, model.set_member_color(Group::Lat, 2, Color::RED));

        let lat: Vec<Color> = model
            .projectors()
            .iter()
            .filter(|p| p.group == Group::Lat)
            .map(|p| p.color)
            .collect();
        assert_eq!(vec![Color::BLACK, Color::RED], lat);
    }

    #[test]
    fn test_strobe_blinks_four_channel_projectors() {
        let mut model = FixtureModel::new();
        model.patch(Group::Face, ChannelMode::Four).unwrap();
        model.patch(Group::Contre, ChannelMode::Five).unwrap();
        model.set_color(Target::All, Color::WHITE);
        model.set_level(Target::All, 100);
        model.set_strobe(Target::All, 100);

        let lit = model.snapshot_at(Duration::from_millis(0));
        let dark = model.snapshot_at(Duration::from_millis(160));
        assert_eq!([255, 255, 255, 255], lit[0..4]);
        assert_eq!([0, 0, 0, 255], dark[0..4]);
        assert_eq!(lit[10..15], dark[10..15]);
        assert_eq!(lit, model.snapshot_at(Duration::from_millis(220)));
        assert_eq!(lit, model.snapshot_all());
    }

    #[test]
    fn test_unpatch_clears_channels() {
        let (mut model, ids) = six_groups();
        model.set_color(Target::All, Color::WHITE);
        model.unpatch(ids[1]).unwrap();
        let snapshot = model.snapshot_all();
        assert_eq!([0u8; 5], snapshot[10..15]);
        assert_eq!(255, snapshot[20]);
    }
}
