//! The humanoid rig: anatomical slots, the serializable blueprint, and the
//! live handles an agent keeps into the physics world.

use std::f32::consts::{PI, TAU};

use rapier2d::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::physics::PhysicsWorld;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::Left, Side::Right];

    /// Lateral direction in screen space: left legs sit at negative x.
    pub fn sign(self) -> f32 {
        match self {
            Side::Left => -1.0,
            Side::Right => 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyRole {
    Torso,
    Head,
    UpperLegLeft,
    LowerLegLeft,
    FootLeft,
    UpperLegRight,
    LowerLegRight,
    FootRight,
}

impl BodyRole {
    pub const COUNT: usize = 8;
    pub const ALL: [BodyRole; BodyRole::COUNT] = [
        BodyRole::Torso,
        BodyRole::Head,
        BodyRole::UpperLegLeft,
        BodyRole::LowerLegLeft,
        BodyRole::FootLeft,
        BodyRole::UpperLegRight,
        BodyRole::LowerLegRight,
        BodyRole::FootRight,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn upper_leg(side: Side) -> Self {
        match side {
            Side::Left => BodyRole::UpperLegLeft,
            Side::Right => BodyRole::UpperLegRight,
        }
    }

    pub fn lower_leg(side: Side) -> Self {
        match side {
            Side::Left => BodyRole::LowerLegLeft,
            Side::Right => BodyRole::LowerLegRight,
        }
    }

    pub fn foot(side: Side) -> Self {
        match side {
            Side::Left => BodyRole::FootLeft,
            Side::Right => BodyRole::FootRight,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JointKind {
    Hip,
    Knee,
    Ankle,
}

/// Motorized joints, in the order the actuator vector addresses them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotorSlot {
    HipLeft,
    KneeLeft,
    AnkleLeft,
    HipRight,
    KneeRight,
    AnkleRight,
}

impl MotorSlot {
    pub const COUNT: usize = 6;
    pub const ALL: [MotorSlot; MotorSlot::COUNT] = [
        MotorSlot::HipLeft,
        MotorSlot::KneeLeft,
        MotorSlot::AnkleLeft,
        MotorSlot::HipRight,
        MotorSlot::KneeRight,
        MotorSlot::AnkleRight,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn new(kind: JointKind, side: Side) -> Self {
        match (kind, side) {
            (JointKind::Hip, Side::Left) => MotorSlot::HipLeft,
            (JointKind::Knee, Side::Left) => MotorSlot::KneeLeft,
            (JointKind::Ankle, Side::Left) => MotorSlot::AnkleLeft,
            (JointKind::Hip, Side::Right) => MotorSlot::HipRight,
            (JointKind::Knee, Side::Right) => MotorSlot::KneeRight,
            (JointKind::Ankle, Side::Right) => MotorSlot::AnkleRight,
        }
    }

    pub fn side(self) -> Side {
        match self {
            MotorSlot::HipLeft | MotorSlot::KneeLeft | MotorSlot::AnkleLeft => Side::Left,
            MotorSlot::HipRight | MotorSlot::KneeRight | MotorSlot::AnkleRight => Side::Right,
        }
    }

    pub fn kind(self) -> JointKind {
        match self {
            MotorSlot::HipLeft | MotorSlot::HipRight => JointKind::Hip,
            MotorSlot::KneeLeft | MotorSlot::KneeRight => JointKind::Knee,
            MotorSlot::AnkleLeft | MotorSlot::AnkleRight => JointKind::Ankle,
        }
    }

    pub fn parent(self) -> BodyRole {
        let side = self.side();
        match self.kind() {
            JointKind::Hip => BodyRole::Torso,
            JointKind::Knee => BodyRole::upper_leg(side),
            JointKind::Ankle => BodyRole::lower_leg(side),
        }
    }

    pub fn child(self) -> BodyRole {
        let side = self.side();
        match self.kind() {
            JointKind::Hip => BodyRole::upper_leg(side),
            JointKind::Knee => BodyRole::lower_leg(side),
            JointKind::Ankle => BodyRole::foot(side),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartShape {
    Box { width: f32, height: f32 },
    Circle { radius: f32 },
}

impl PartShape {
    pub fn extents(self) -> [f32; 2] {
        match self {
            PartShape::Box { width, height } => [width, height],
            PartShape::Circle { radius } => [radius * 2.0, radius * 2.0],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartSpec {
    pub role: BodyRole,
    pub mass: f32,
    pub moment: f32,
    pub shape: PartShape,
    pub friction: f32,
    /// Centre offset from the spawn point.
    pub offset: [f32; 2],
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JointSpec {
    pub parent: BodyRole,
    pub child: BodyRole,
    pub anchor_parent: [f32; 2],
    pub anchor_child: [f32; 2],
    /// Rotary limit on `child.angle - parent.angle`.
    pub limits: Option<[f32; 2]>,
    pub motor_max_force: Option<f32>,
}

/// Complete, serializable rig description. Part and motor arrays are indexed
/// by [`BodyRole::index`] and [`MotorSlot::index`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RigBlueprint {
    pub parts: [PartSpec; BodyRole::COUNT],
    pub neck: JointSpec,
    pub motors: [JointSpec; MotorSlot::COUNT],
}

impl RigBlueprint {
    /// The reference walker.
    pub fn humanoid() -> Self {
        let box_part = |role, mass, moment, width, height, friction, offset| PartSpec {
            role,
            mass,
            moment,
            shape: PartShape::Box { width, height },
            friction,
            offset,
        };

        let parts = BodyRole::ALL.map(|role| match role {
            BodyRole::Torso => box_part(role, 15.0, 150.0, 20.0, 80.0, 0.3, [0.0, -50.0]),
            BodyRole::Head => PartSpec {
                role,
                mass: 5.0,
                moment: 50.0,
                shape: PartShape::Circle { radius: 20.0 },
                friction: 0.3,
                offset: [0.0, -110.0],
            },
            BodyRole::UpperLegLeft | BodyRole::UpperLegRight => {
                let x = leg_side(role).sign() * 15.0;
                box_part(role, 6.0, 100.0, 12.0, 50.0, 0.3, [x, -5.0])
            }
            BodyRole::LowerLegLeft | BodyRole::LowerLegRight => {
                let x = leg_side(role).sign() * 15.0;
                box_part(role, 4.0, 80.0, 10.0, 40.0, 0.3, [x, 45.0])
            }
            BodyRole::FootLeft | BodyRole::FootRight => {
                let x = leg_side(role).sign() * 15.0;
                box_part(role, 2.0, 20.0, 25.0, 8.0, 1.0, [x, 75.0])
            }
        });

        let neck = JointSpec {
            parent: BodyRole::Torso,
            child: BodyRole::Head,
            anchor_parent: [0.0, -40.0],
            anchor_child: [0.0, 20.0],
            limits: None,
            motor_max_force: None,
        };

        let motors = MotorSlot::ALL.map(|slot| {
            let (anchor_parent, anchor_child, limits, max_force) = match slot.kind() {
                JointKind::Hip => (
                    [slot.side().sign() * 10.0, 40.0],
                    [0.0, -25.0],
                    [-PI / 2.0, PI / 3.0],
                    800_000.0,
                ),
                JointKind::Knee => ([0.0, 25.0], [0.0, -20.0], [-PI / 8.0, PI / 2.0], 600_000.0),
                JointKind::Ankle => ([0.0, 20.0], [0.0, -4.0], [-PI / 4.0, PI / 4.0], 400_000.0),
            };
            JointSpec {
                parent: slot.parent(),
                child: slot.child(),
                anchor_parent,
                anchor_child,
                limits: Some(limits),
                motor_max_force: Some(max_force),
            }
        });

        Self {
            parts,
            neck,
            motors,
        }
    }

    /// Topology is fixed; a blueprint may only tune numbers.
    pub fn validate(&self) -> Result<()> {
        for (role, part) in BodyRole::ALL.iter().zip(&self.parts) {
            if part.role != *role {
                return Err(SimError::Blueprint(format!(
                    "part slot {role:?} holds {:?}",
                    part.role
                )));
            }
            let finite = part.mass.is_finite()
                && part.moment.is_finite()
                && part.offset.iter().all(|v| v.is_finite());
            if !finite || part.mass <= 0.0 || part.moment <= 0.0 {
                return Err(SimError::Blueprint(format!(
                    "{role:?} needs finite positive mass and moment"
                )));
            }
        }
        if self.neck.parent != BodyRole::Torso || self.neck.child != BodyRole::Head {
            return Err(SimError::Blueprint("neck must join torso to head".into()));
        }
        for (slot, joint) in MotorSlot::ALL.iter().zip(&self.motors) {
            if joint.parent != slot.parent() || joint.child != slot.child() {
                return Err(SimError::Blueprint(format!(
                    "{slot:?} must join {:?} to {:?}",
                    slot.parent(),
                    slot.child()
                )));
            }
            if joint.motor_max_force.is_none_or(|force| force <= 0.0) {
                return Err(SimError::Blueprint(format!("{slot:?} needs a motor")));
            }
            if let Some([min, max]) = joint.limits
                && min > max
            {
                return Err(SimError::Blueprint(format!("{slot:?} limits are inverted")));
            }
        }
        Ok(())
    }
}

fn leg_side(role: BodyRole) -> Side {
    match role {
        BodyRole::UpperLegRight | BodyRole::LowerLegRight | BodyRole::FootRight => Side::Right,
        _ => Side::Left,
    }
}

/// One part's kinematic state for a single frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PartState {
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub vx: f32,
    pub vy: f32,
    pub angular_velocity: f32,
}

/// Everything the sensor, liveness and fitness code needs from one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RigState {
    pub parts: [PartState; BodyRole::COUNT],
    pub motor_rates: [f32; MotorSlot::COUNT],
}

impl RigState {
    pub fn part(&self, role: BodyRole) -> &PartState {
        &self.parts[role.index()]
    }

    pub fn part_mut(&mut self, role: BodyRole) -> &mut PartState {
        &mut self.parts[role.index()]
    }

    pub fn torso(&self) -> &PartState {
        self.part(BodyRole::Torso)
    }

    pub fn head(&self) -> &PartState {
        self.part(BodyRole::Head)
    }

    /// Child angle relative to its parent, wrapped into `[-pi, pi)`.
    pub fn joint_angle(&self, slot: MotorSlot) -> f32 {
        wrap_angle(self.part(slot.child()).angle - self.part(slot.parent()).angle)
    }
}

pub fn wrap_angle(angle: f32) -> f32 {
    let mut wrapped = (angle + PI) % TAU;
    if wrapped < 0.0 {
        wrapped += TAU;
    }
    wrapped - PI
}

/// Live handles of one agent's rig.
#[derive(Clone, Debug)]
pub struct Rig {
    parts: [PartSpec; BodyRole::COUNT],
    bodies: [RigidBodyHandle; BodyRole::COUNT],
    neck: ImpulseJointHandle,
    motors: [ImpulseJointHandle; MotorSlot::COUNT],
}

impl Rig {
    /// Insert one rig at `spawn`. Geometry depends only on the blueprint and
    /// the spawn point.
    pub fn build(
        world: &mut PhysicsWorld,
        blueprint: &RigBlueprint,
        spawn: [f32; 2],
        motor_response: f32,
    ) -> Result<Self> {
        if !spawn.iter().all(|v| v.is_finite()) {
            return Err(SimError::InvalidSpawn {
                x: spawn[0],
                y: spawn[1],
            });
        }
        blueprint.validate()?;

        let bodies = blueprint.parts.map(|part| {
            let center = vector![spawn[0] + part.offset[0], spawn[1] + part.offset[1]];
            world.insert_part(&part, center)
        });
        let neck = world.insert_joint(
            bodies[blueprint.neck.parent.index()],
            bodies[blueprint.neck.child.index()],
            &blueprint.neck,
            motor_response,
        );
        let motors = blueprint.motors.map(|joint| {
            world.insert_joint(
                bodies[joint.parent.index()],
                bodies[joint.child.index()],
                &joint,
                motor_response,
            )
        });

        Ok(Self {
            parts: blueprint.parts,
            bodies,
            neck,
            motors,
        })
    }

    pub fn body(&self, role: BodyRole) -> RigidBodyHandle {
        self.bodies[role.index()]
    }

    pub fn motor(&self, slot: MotorSlot) -> ImpulseJointHandle {
        self.motors[slot.index()]
    }

    pub fn part_extents(&self) -> [[f32; 2]; BodyRole::COUNT] {
        self.parts.map(|part| part.shape.extents())
    }

    pub fn read_state(&self, world: &PhysicsWorld) -> Result<RigState> {
        let mut state = RigState::default();
        for role in BodyRole::ALL {
            let body = world
                .body(self.body(role))
                .ok_or(SimError::MissingBody(role))?;
            let position = body.translation();
            let velocity = body.linvel();
            state.parts[role.index()] = PartState {
                x: position.x,
                y: position.y,
                angle: body.rotation().angle(),
                vx: velocity.x,
                vy: velocity.y,
                angular_velocity: body.angvel(),
            };
        }
        for slot in MotorSlot::ALL {
            state.motor_rates[slot.index()] = world
                .motor_rate(self.motor(slot))
                .ok_or(SimError::MissingJoint(slot))?;
        }
        Ok(state)
    }

    /// Reconstruct the blueprint from what the physics world actually holds:
    /// joint topology, anchors, limits and motor forces come from the live
    /// joints.
    pub fn describe(&self, world: &PhysicsWorld) -> Result<RigBlueprint> {
        let neck = self
            .describe_joint(world, self.neck)
            .ok_or(SimError::MissingNeck)?;
        let mut motors = Vec::with_capacity(MotorSlot::COUNT);
        for slot in MotorSlot::ALL {
            let joint = self
                .describe_joint(world, self.motor(slot))
                .ok_or(SimError::MissingJoint(slot))?;
            motors.push(joint);
        }
        let motors: [JointSpec; MotorSlot::COUNT] = motors
            .try_into()
            .map_err(|_| SimError::Blueprint("motor count mismatch".into()))?;
        Ok(RigBlueprint {
            parts: self.parts,
            neck,
            motors,
        })
    }

    fn describe_joint(&self, world: &PhysicsWorld, handle: ImpulseJointHandle) -> Option<JointSpec> {
        let joint = world.joint(handle)?;
        let parent = self.role_of(joint.body1)?;
        let child = self.role_of(joint.body2)?;
        let anchor_parent = joint.data.local_anchor1();
        let anchor_child = joint.data.local_anchor2();
        Some(JointSpec {
            parent,
            child,
            anchor_parent: [anchor_parent.x, anchor_parent.y],
            anchor_child: [anchor_child.x, anchor_child.y],
            limits: joint
                .data
                .limits(JointAxis::AngX)
                .map(|limits| [limits.min, limits.max]),
            motor_max_force: joint
                .data
                .motor(JointAxis::AngX)
                .map(|motor| motor.max_force),
        })
    }

    fn role_of(&self, handle: RigidBodyHandle) -> Option<BodyRole> {
        BodyRole::ALL
            .into_iter()
            .find(|role| self.bodies[role.index()] == handle)
    }

    /// Remove every body (and with them every joint) from the world.
    /// Consumes the rig so the release can only happen once.
    pub fn release(self, world: &mut PhysicsWorld) -> usize {
        self.bodies
            .into_iter()
            .filter(|handle| world.remove_body(*handle))
            .count()
    }
}
