//! Enemy variants -- template chains feeding a live scene graph.
//!
//! Builds an enemy template, two levels of variants, and a patrol group that
//! places variant instances around a rotated anchor. Then edits the root
//! template and shows the change flowing through to every variant that did
//! not override it.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example enemy_variants -p lineage-scene

use std::f32::consts::FRAC_PI_2;

use lineage_core::prelude::*;
use lineage_scene::prelude::*;
use lineage_templates::prelude::*;

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
enum GameComponent {
    Enemy { id: String, health: i32, mana: i32 },
    Loot { id: String, gold: u32 },
}

impl ComponentData for GameComponent {
    fn id(&self) -> &str {
        match self {
            GameComponent::Enemy { id, .. } | GameComponent::Loot { id, .. } => id,
        }
    }
}

fn enemy_mut(entity: &mut Entity<GameComponent>) -> Option<(&mut i32, &mut i32)> {
    match entity.component_mut("stats")? {
        GameComponent::Enemy { health, mana, .. } => Some((health, mana)),
        GameComponent::Loot { .. } => None,
    }
}

fn describe(label: &str, entity: &Entity<GameComponent>) {
    let stats = match entity.component("stats") {
        Some(GameComponent::Enemy { health, mana, .. }) => format!("health {health}, mana {mana}"),
        _ => "no stats".to_owned(),
    };
    let gold = match entity.component("loot") {
        Some(GameComponent::Loot { gold, .. }) => format!(", {gold} gold"),
        _ => String::new(),
    };
    println!("  {label:<10} {stats}{gold}");
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let mut templates: TemplatesIo<GameComponent, _> =
        TemplatesIo::new(InMemoryStore::new()).with_id_generator(IdGenerator::seeded(2024));

    // Template chain: grunt -> veteran -> captain.
    let grunt = Entity::new()
        .with_component(GameComponent::Enemy {
            id: "stats".into(),
            health: 100,
            mana: 10,
        })
        .with_tag("hostile");
    templates.save_as_template(&grunt)?;

    let mut veteran = templates.create_variant_instance_of(&grunt)?;
    if let Some((health, _)) = enemy_mut(&mut veteran) {
        *health = 200;
    }
    templates.save_as_template(&veteran)?;

    let mut captain = templates.create_variant_instance_of(&veteran)?;
    if let Some((_, mana)) = enemy_mut(&mut captain) {
        *mana = 40;
    }
    captain.upsert_component(GameComponent::Loot {
        id: "loot".into(),
        gold: 25,
    });
    templates.save_as_template(&captain)?;

    println!("template chain:");
    for (label, id) in [("grunt", &grunt.id), ("veteran", &veteran.id), ("captain", &captain.id)] {
        describe(label, &templates.load_template_instance(id)?);
    }

    // Branching from an unsaved variant is refused.
    let scratch = templates.create_variant_instance_of(&grunt)?;
    match templates.create_variant_instance_of(&scratch) {
        Err(e) => println!("\nbranching from an unsaved variant: {e}"),
        Ok(_) => println!("\nbranching from an unsaved variant unexpectedly succeeded"),
    }

    // Late binding: buff every grunt-derived enemy's mana at the root.
    let mut buffed = templates.load_template_instance(&grunt.id)?;
    if let Some((_, mana)) = enemy_mut(&mut buffed) {
        *mana = 15;
    }
    templates.save_as_template(&buffed)?;

    println!("\nafter editing the grunt template:");
    for (label, id) in [("grunt", &grunt.id), ("veteran", &veteran.id), ("captain", &captain.id)] {
        describe(label, &templates.load_template_instance(id)?);
    }

    // Scene: a rotated anchor with a captain ahead of it and a veteran at its
    // side.
    let mut scene = SceneGraph::new(templates);
    let anchor = scene.add(
        Entity::new().with_pose(Pose::from_axis_angle(Vec3::NEG_Y, FRAC_PI_2)),
    )?;

    let mut lead = scene.templates_mut().create_variant_of(&captain.id)?;
    lead.local_pose = Some(Pose::from_xyz(2.0, 0.0, 0.0));
    let lead = scene.add_child(&anchor, lead, append_child_id)?;

    let mut flank = scene.templates_mut().create_variant_of(&veteran.id)?;
    flank.local_pose = Some(Pose::from_xyz(0.0, 0.0, 1.0));
    let flank = scene.add_child(&anchor, flank, append_child_id)?;

    println!("\npatrol (anchor rotated a quarter turn):");
    for (label, id) in [("lead", &lead), ("flank", &flank)] {
        if let Some(pose) = scene.global_pose(id) {
            let p = pose.translation;
            println!("  {label:<10} world position ({:.2}, {:.2}, {:.2})", p.x, p.y, p.z);
        }
    }

    for id in [&anchor, &lead, &flank] {
        scene.persist(id)?;
    }

    let destroyed = scene.destroy_recursive(&anchor, remove_child_id);
    println!("\ndestroyed {destroyed} entities, {} still live", scene.len());

    // A fresh graph over the same store brings back the root templates and
    // the hierarchy under them.
    let mut restored = SceneGraph::new(scene.into_templates());
    let count = restored.load_scene_graph_from_disk()?;
    println!("reloaded {count} entities, anchor has {} children", restored.get_children(&anchor).len());
    if let Some(pose) = restored.global_pose(&lead) {
        let p = pose.translation;
        println!("  lead is back at ({:.2}, {:.2}, {:.2})", p.x, p.y, p.z);
    }

    Ok(())
}
