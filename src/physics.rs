//! Thin adaptor over the rapier2d pipeline.
//!
//! The world is expressed in screen space (pixels, `y` down, gravity
//! positive). Agents hold plain body/joint handles into the arenas owned
//! here; nothing else keeps rapier state.

use rapier2d::prelude::*;

use crate::config::ArenaConfig;
use crate::error::{Result, SimError};
use crate::rig::{JointSpec, PartShape, PartSpec};

pub const GROUND_COLLISION_GROUP: Group = Group::GROUP_1;
pub const CREATURE_COLLISION_GROUP: Group = Group::GROUP_2;
const GROUND_HALF_LENGTH: f32 = 11_000.0;
const GROUND_CENTER_X: f32 = 9_000.0;
const SOLVER_ITERATIONS: usize = 8;
const LENGTH_UNIT: f32 = 50.0;

pub struct PhysicsWorld {
    pipeline: PhysicsPipeline,
    gravity: Vector<f32>,
    integration_parameters: IntegrationParameters,
    island_manager: IslandManager,
    broad_phase: BroadPhaseBvh,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    ground: RigidBodyHandle,
    tick: u64,
}

impl PhysicsWorld {
    pub fn new(arena: &ArenaConfig) -> Self {
        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = arena.dt();
        integration_parameters.length_unit = LENGTH_UNIT;
        integration_parameters.num_solver_iterations = SOLVER_ITERATIONS;

        let mut bodies = RigidBodySet::new();
        let mut colliders = ColliderSet::new();

        // The ground surface sits `ground_half_thickness` above the ground
        // line, matching a thick segment centred on it.
        let ground = bodies.insert(
            RigidBodyBuilder::fixed()
                .translation(vector![GROUND_CENTER_X, arena.ground_level()])
                .build(),
        );
        let ground_collider =
            ColliderBuilder::cuboid(GROUND_HALF_LENGTH, arena.ground_half_thickness)
                .friction(arena.ground_friction)
                .collision_groups(InteractionGroups::new(
                    GROUND_COLLISION_GROUP,
                    CREATURE_COLLISION_GROUP,
                    InteractionTestMode::And,
                ))
                .build();
        colliders.insert_with_parent(ground_collider, ground, &mut bodies);

        Self {
            pipeline: PhysicsPipeline::new(),
            gravity: vector![0.0, arena.gravity],
            integration_parameters,
            island_manager: IslandManager::new(),
            broad_phase: BroadPhaseBvh::new(),
            narrow_phase: NarrowPhase::new(),
            bodies,
            colliders,
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            ground,
            tick: 0,
        }
    }

    pub fn dt(&self) -> f32 {
        self.integration_parameters.dt
    }

    /// Number of completed physics steps.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Advance every body by one fixed tick.
    ///
    /// A non-finite body afterwards means the solver blew up; that is fatal
    /// for the generation.
    pub fn step(&mut self) -> Result<()> {
        self.pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            &(),
            &(),
        );
        self.tick += 1;

        let diverged = self.bodies.iter().any(|(_, body)| {
            body.is_dynamic()
                && !(body.translation().iter().all(|v| v.is_finite())
                    && body.rotation().angle().is_finite()
                    && body.linvel().iter().all(|v| v.is_finite())
                    && body.angvel().is_finite())
        });
        if diverged {
            return Err(SimError::PhysicsDiverged { tick: self.tick });
        }
        Ok(())
    }

    pub fn insert_part(&mut self, part: &PartSpec, center: Vector<f32>) -> RigidBodyHandle {
        let handle = self
            .bodies
            .insert(RigidBodyBuilder::dynamic().translation(center).build());
        let builder = match part.shape {
            PartShape::Box { width, height } => ColliderBuilder::cuboid(width * 0.5, height * 0.5),
            PartShape::Circle { radius } => ColliderBuilder::ball(radius),
        };
        let collider = builder
            .mass_properties(MassProperties::new(point![0.0, 0.0], part.mass, part.moment))
            .friction(part.friction)
            .collision_groups(InteractionGroups::new(
                CREATURE_COLLISION_GROUP,
                GROUND_COLLISION_GROUP,
                InteractionTestMode::And,
            ))
            .build();
        self.colliders
            .insert_with_parent(collider, handle, &mut self.bodies);
        handle
    }

    /// Pivot, optional rotary limit and optional velocity motor, all carried
    /// by one revolute joint.
    pub fn insert_joint(
        &mut self,
        parent: RigidBodyHandle,
        child: RigidBodyHandle,
        spec: &JointSpec,
        motor_response: f32,
    ) -> ImpulseJointHandle {
        let mut joint = RevoluteJointBuilder::new()
            .local_anchor1(point![spec.anchor_parent[0], spec.anchor_parent[1]])
            .local_anchor2(point![spec.anchor_child[0], spec.anchor_child[1]])
            .contacts_enabled(false);
        if let Some(limits) = spec.limits {
            joint = joint.limits(limits);
        }
        if let Some(max_force) = spec.motor_max_force {
            joint = joint
                .motor_model(MotorModel::AccelerationBased)
                .motor_velocity(0.0, motor_response)
                .motor_max_force(max_force);
        }
        self.impulse_joints.insert(parent, child, joint, true)
    }

    pub fn body(&self, handle: RigidBodyHandle) -> Option<&RigidBody> {
        self.bodies.get(handle)
    }

    pub fn joint(&self, handle: ImpulseJointHandle) -> Option<&ImpulseJoint> {
        self.impulse_joints.get(handle)
    }

    pub fn set_motor_rate(&mut self, handle: ImpulseJointHandle, rate: f32, response: f32) -> bool {
        let Some(joint) = self.impulse_joints.get_mut(handle, true) else {
            return false;
        };
        joint.data.set_motor_velocity(JointAxis::AngX, rate, response);
        true
    }

    pub fn motor_rate(&self, handle: ImpulseJointHandle) -> Option<f32> {
        self.impulse_joints
            .get(handle)?
            .data
            .motor(JointAxis::AngX)
            .map(|motor| motor.target_vel)
    }

    /// Remove a body with its colliders and attached joints. Returns `false`
    /// if the handle was already gone.
    pub fn remove_body(&mut self, handle: RigidBodyHandle) -> bool {
        if handle == self.ground {
            return false;
        }
        self.bodies
            .remove(
                handle,
                &mut self.island_manager,
                &mut self.colliders,
                &mut self.impulse_joints,
                &mut self.multibody_joints,
                true,
            )
            .is_some()
    }

    pub fn dynamic_body_count(&self) -> usize {
        self.bodies
            .iter()
            .filter(|(_, body)| body.is_dynamic())
            .count()
    }

    pub fn joint_count(&self) -> usize {
        self.impulse_joints.len()
    }
}
