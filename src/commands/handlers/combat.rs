use crate::commands::registry::{CommandRegistry, CommandSpec};
use crate::commands::rules::ParamSpec;
use crate::commands::CommandContext;
use crate::game::combatant::{AttackKind, ACCURACY};
use crate::game::errors::{GameError, GameResult};
use crate::game::item::EquipSlot;
use crate::game::registry::lock;
use crate::server::messages;

pub fn register(registry: &mut CommandRegistry) {
    registry.add(
        CommandSpec::new("/aim", "Gridlock someone in your cell.", aim)
            .param(ParamSpec::new("target", "Target", &["required", "target"]))
            .cooldown("aim"),
    );
    registry.add(CommandSpec::new("/unaim", "Lower your weapon.", unaim));
    registry.add(CommandSpec::new("/shoot", "Fire your ranged weapon at your target.", shoot).cooldown("attack"));
    registry.add(CommandSpec::new("/strike", "Hit your target with your melee weapon.", strike).cooldown("attack"));
    registry.add(CommandSpec::new("/punch", "Hit your target with your fists.", punch).cooldown("attack"));
    registry.add(
        CommandSpec::new("/consider", "Size up an NPC.", consider)
            .param(ParamSpec::new("npc", "NPC", &["required", "npc"])),
    );
}

fn aim(ctx: &CommandContext<'_>) -> GameResult<()> {
    let target = ctx.entity("target")?.clone();
    let locked = ctx.world.gridlock(ctx.actor, &target.id)?;
    ctx.reply(format!("You take aim at {}.", locked.name));
    Ok(())
}

fn unaim(ctx: &CommandContext<'_>) -> GameResult<()> {
    match ctx.world.release_target(ctx.actor) {
        Some(released) => {
            ctx.reply(format!("You lower your weapon from {}.", released.name));
            Ok(())
        }
        None => Err(GameError::invalid("You are not aiming at anyone.")),
    }
}

fn attack_with(ctx: &CommandContext<'_>, kind: AttackKind) -> GameResult<()> {
    let outcome = ctx.world.attack(ctx.actor, kind)?;
    if outcome.killed() {
        ctx.reply(format!("You killed {}!", outcome.defender.name));
    }
    Ok(())
}

fn shoot(ctx: &CommandContext<'_>) -> GameResult<()> {
    attack_with(ctx, AttackKind::Shoot)
}

fn strike(ctx: &CommandContext<'_>) -> GameResult<()> {
    attack_with(ctx, AttackKind::Strike)
}

fn punch(ctx: &CommandContext<'_>) -> GameResult<()> {
    attack_with(ctx, AttackKind::Punch)
}

fn consider(ctx: &CommandContext<'_>) -> GameResult<()> {
    let npc = ctx.entity("npc")?.clone();
    let mine = {
        let handle = ctx.handle()?;
        let me = lock(&handle);
        me.state.health
    };
    let target = ctx
        .world
        .entities
        .get(&npc.id)
        .ok_or_else(|| GameError::not_found("There is nobody around by that name."))?;
    let lines = {
        let them = lock(&target);
        let weapon = them
            .state
            .inventory
            .equipped(EquipSlot::Weapon)
            .map(|(_, w)| w.name.clone())
            .unwrap_or_else(|| "nothing".to_string());
        let verdict = match them.state.health as f64 / mine.max(1) as f64 {
            r if r < 0.5 => "looks like an easy fight",
            r if r < 1.2 => "looks like a fair fight",
            r if r < 2.0 => "looks dangerous",
            _ => "would crush you",
        };
        let mut lines = vec![
            format!(
                "{}: health {}/{}, armed with {}.",
                them.state.name, them.state.health, them.state.health_max, weapon
            ),
            format!("It {} (accuracy {:.0}).", verdict, them.state.skill(ACCURACY)),
        ];
        if them.npc().and_then(|n| n.shop_id.as_ref()).is_some() {
            lines.push("It has goods for sale. Try /shop.".to_string());
        }
        lines
    };
    ctx.reply_lines(&lines);
    ctx.send(messages::combat_log(format!("You size up {}.", npc.name)));
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::commands::handlers::testutil::Harness;
    use crate::game::types::Location;
    use crate::server::messages;

    #[test]
    fn aim_links_both_sides_and_unaim_releases() {
        let h = Harness::new();
        h.join("c2", "Bo", Location::new("town", 3, 3));
        h.join("c1", "Ash", Location::new("town", 3, 3));
        h.run("c1", "/aim bo");
        assert!(h.edit("c1", |e| e.state.is_targeting("c2")));
        assert!(h.edit("c2", |e| e.state.targeted_by.iter().any(|r| r.id == "c1")));

        h.run("c1", "/aim bo");
        assert!(h.errors("c1")[0].contains("already aiming"));

        h.run("c1", "/unaim");
        assert!(h.edit("c1", |e| e.state.target.is_none()));
        assert!(h.edit("c2", |e| e.state.targeted_by.is_empty()));
    }

    #[test]
    fn aim_at_someone_elsewhere_fails() {
        let h = Harness::new();
        h.join("c2", "Bo", Location::new("town", 4, 3));
        h.join("c1", "Ash", Location::new("town", 3, 3));
        h.run("c1", "/aim bo");
        assert_eq!(h.errors("c1"), vec!["There is nobody around by that name.".to_string()]);
    }

    #[test]
    fn punch_needs_a_target_and_logs_to_the_cell() {
        let h = Harness::new();
        let watcher = h.join("c3", "Cy", Location::new("town", 3, 3));
        h.join("c2", "Bo", Location::new("town", 3, 3));
        h.join("c1", "Ash", Location::new("town", 3, 3));
        h.run("c1", "/punch");
        assert!(h.errors("c1")[0].contains("/aim first"));

        h.run("c1", "/aim bo");
        h.transport.take();
        h.run("c1", "/punch");
        assert_eq!(h.transport.to(&watcher, messages::COMMAND_ERROR).len(), 0);
        assert_eq!(h.transport.to(&watcher, messages::COMBAT_LOG).len(), 1);
    }
}
