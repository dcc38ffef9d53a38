//! Faction commands.
//!
//! Every roster change runs inside [`FactionRegistry::with_faction`], so a
//! command racing `/fdisband` either lands before the disband or fails with
//! "That faction no longer exists.". Online members are unlinked after the
//! faction lock is released; offline members are reconciled at login.
//!
//! [`FactionRegistry::with_faction`]: crate::game::faction::FactionRegistry::with_faction

use log::info;

use crate::commands::registry::{CommandRegistry, CommandSpec};
use crate::commands::rules::ParamSpec;
use crate::commands::CommandContext;
use crate::game::errors::{GameError, GameResult};
use crate::game::faction::Faction;
use crate::game::registry::lock;
use crate::game::types::EntityRef;
use crate::server::messages;
use crate::storage::PersistJob;

pub fn register(registry: &mut CommandRegistry) {
    registry.add(
        CommandSpec::new("/fcreate", "Found a faction.", create)
            .param(ParamSpec::new("name", "Name", &["required", "minlen:3", "maxlen:24"]))
            .param(ParamSpec::new("tag", "Tag", &["required", "alphanum", "minlen:2", "maxlen:5"])),
    );
    registry.add(
        CommandSpec::new("/finvite", "Invite a player on your map.", invite)
            .param(ParamSpec::new("player", "Player", &["required", "player:map"])),
    );
    registry.add(
        CommandSpec::new("/fjoin", "Accept a faction invite.", join)
            .param(ParamSpec::new("faction", "Faction", &["required", "faction"])),
    );
    registry.add(CommandSpec::new("/fleave", "Leave your faction.", leave));
    registry.add(
        CommandSpec::new("/fkick", "Remove a member from your faction.", kick)
            .param(ParamSpec::new("name", "Member", &["required", "maxlen:32"]).rest()),
    );
    registry.add(CommandSpec::new("/fdisband", "Dissolve your faction.", disband));
    registry.add(
        CommandSpec::new("/fsay", "Talk to your faction.", say)
            .param(ParamSpec::new("message", "Message", &["required", "maxlen:280"]).rest())
            .cooldown("chat"),
    );
}

/// Faction id and identity of the invoker.
fn membership(ctx: &CommandContext<'_>) -> GameResult<(String, EntityRef)> {
    let handle = ctx.handle()?;
    let entity = lock(&handle);
    let fid = entity
        .faction_id()
        .map(str::to_string)
        .ok_or_else(|| GameError::invalid("You are not in a faction."))?;
    Ok((fid, entity.state.entity_ref()))
}

fn leader_only(faction: &Faction, id: &str) -> GameResult<()> {
    if faction.is_leader(id) {
        Ok(())
    } else {
        Err(GameError::invalid("Only the faction leader can do that."))
    }
}

fn broadcast_roster(ctx: &CommandContext<'_>, faction: &Faction) {
    ctx.world
        .router
        .to_room(&faction.id, messages::faction_update(Some(faction)));
}

/// Drops an online character's link to `faction_id`, if it still has it.
fn unlink_member(ctx: &CommandContext<'_>, member_id: &str, faction_id: &str, notice: &str) {
    let Some(handle) = ctx.world.entities.get(member_id) else {
        return;
    };
    let mut entity = lock(&handle);
    if entity.faction_id() != Some(faction_id) {
        return;
    }
    if let Some(player) = entity.player_mut() {
        player.faction_id = None;
    }
    if let Some(conn) = entity.connection().cloned() {
        ctx.world.router.leave(&conn, faction_id);
    }
    ctx.world.send_to_entity(&entity, messages::faction_update(None));
    ctx.world.feed(&entity, notice);
}

fn create(ctx: &CommandContext<'_>) -> GameResult<()> {
    let name = ctx.text("name")?;
    let tag = ctx.text("tag")?.to_uppercase();
    let handle = ctx.handle()?;
    let faction = {
        let mut entity = lock(&handle);
        if entity.faction_id().is_some() {
            return Err(GameError::invalid("You are already in a faction."));
        }
        let me = entity.state.entity_ref();
        let faction = ctx.world.factions.create(&name, &tag, &me)?;
        if let Some(player) = entity.player_mut() {
            player.faction_id = Some(faction.id.clone());
        }
        faction
    };
    ctx.world.router.join(ctx.connection, &faction.id);
    ctx.world.persist(PersistJob::Faction(faction.clone()));
    info!("faction [{}] {} founded by {}", faction.tag, faction.name, ctx.actor);
    broadcast_roster(ctx, &faction);
    ctx.reply(format!("You found [{}] {}.", faction.tag, faction.name));
    Ok(())
}

fn invite(ctx: &CommandContext<'_>) -> GameResult<()> {
    let target = ctx.entity("player")?.clone();
    let (fid, me) = membership(ctx)?;
    let (name, tag) = ctx.world.factions.with_faction(&fid, |f| {
        leader_only(f, &me.id)?;
        if f.is_member(&target.id) {
            return Err(GameError::invalid(format!("{} is already a member.", target.name)));
        }
        if !f.invite(&target.id) {
            return Err(GameError::invalid(format!("{} has already been invited.", target.name)));
        }
        Ok((f.name.clone(), f.tag.clone()))
    })?;
    ctx.world.send_to_id(
        &target.id,
        messages::feed(format!(
            "{} invites you to join [{}] {}. Type /fjoin {} to accept.",
            me.name, tag, name, tag
        )),
    );
    ctx.reply(format!("You invite {} to [{}] {}.", target.name, tag, name));
    Ok(())
}

fn join(ctx: &CommandContext<'_>) -> GameResult<()> {
    let fid = ctx.id("faction")?.to_string();
    let handle = ctx.handle()?;
    let faction = {
        let mut entity = lock(&handle);
        if entity.faction_id().is_some() {
            return Err(GameError::invalid("You are already in a faction."));
        }
        let me = entity.state.entity_ref();
        let faction = ctx.world.factions.with_faction(&fid, |f| {
            f.accept(&me)?;
            Ok(f.clone())
        })?;
        if let Some(player) = entity.player_mut() {
            player.faction_id = Some(fid.clone());
        }
        faction
    };
    ctx.world.router.join(ctx.connection, &fid);
    ctx.world.persist(PersistJob::Faction(faction.clone()));
    broadcast_roster(ctx, &faction);
    ctx.reply(format!("You join [{}] {}.", faction.tag, faction.name));
    Ok(())
}

fn leave(ctx: &CommandContext<'_>) -> GameResult<()> {
    let (fid, me) = membership(ctx)?;
    let result = ctx.world.factions.with_faction(&fid, |f| {
        if f.is_leader(&me.id) {
            return Err(GameError::invalid("The leader cannot leave. Use /fdisband."));
        }
        f.remove_member(&me.id);
        Ok(f.clone())
    });
    let faction = match result {
        Ok(f) => Some(f),
        Err(e @ GameError::InvalidState(_)) => return Err(e),
        // Disbanded meanwhile; only the local link is left to clear.
        Err(_) => None,
    };
    unlink_member(ctx, &me.id, &fid, "You leave your faction.");
    if let Some(faction) = faction {
        ctx.world.persist(PersistJob::Faction(faction.clone()));
        broadcast_roster(ctx, &faction);
    }
    Ok(())
}

fn kick(ctx: &CommandContext<'_>) -> GameResult<()> {
    let name = ctx.text("name")?;
    let (fid, me) = membership(ctx)?;
    let (kicked, faction) = ctx.world.factions.with_faction(&fid, |f| {
        leader_only(f, &me.id)?;
        let id = f
            .member_by_name(&name)
            .ok_or_else(|| GameError::not_found(format!("{} is not a member.", name)))?;
        if id == me.id {
            return Err(GameError::invalid("You can't kick yourself. Use /fdisband."));
        }
        f.remove_member(&id);
        Ok((id, f.clone()))
    })?;
    unlink_member(
        ctx,
        &kicked,
        &fid,
        &format!("You have been removed from [{}] {}.", faction.tag, faction.name),
    );
    ctx.world.persist(PersistJob::Faction(faction.clone()));
    broadcast_roster(ctx, &faction);
    ctx.reply(format!("{} is no longer a member.", name));
    Ok(())
}

fn disband(ctx: &CommandContext<'_>) -> GameResult<()> {
    let (fid, me) = membership(ctx)?;
    let faction = ctx.world.factions.disband(&fid, &me.id)?;
    let notice = format!("[{}] {} has been disbanded.", faction.tag, faction.name);
    for member in faction.members.keys() {
        unlink_member(ctx, member, &fid, &notice);
    }
    ctx.world.persist(PersistJob::DeleteFaction { id: fid });
    info!("faction [{}] {} disbanded", faction.tag, faction.name);
    Ok(())
}

fn say(ctx: &CommandContext<'_>) -> GameResult<()> {
    let message = ctx.text("message")?;
    let (fid, me) = membership(ctx)?;
    if ctx.world.factions.snapshot(&fid).is_none() {
        return Err(GameError::not_found("That faction no longer exists."));
    }
    ctx.world
        .router
        .to_room(&fid, messages::chat("faction", &me.name, &message));
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::commands::handlers::testutil::Harness;
    use crate::game::types::Location;
    use crate::server::messages;

    fn faction_of(h: &Harness, id: &str) -> Option<String> {
        h.edit(id, |e| e.faction_id().map(str::to_string))
    }

    #[test]
    fn create_invite_join_and_chat() {
        let h = Harness::new();
        let bo = h.join("c2", "Bo", Location::new("town", 8, 8));
        h.join("c1", "Ash", Location::new("town", 1, 1));
        h.run("c1", r#"/fcreate "Iron Wolves" irw"#);
        let fid = faction_of(&h, "c1").unwrap();
        assert!(h.world.router.is_in_room("conn-c1", &fid));

        h.run("c2", "/fjoin IRW");
        assert!(h.errors("c2")[0].contains("not been invited"));

        h.run("c1", "/finvite bo");
        h.run("c2", "/fjoin irw");
        assert_eq!(faction_of(&h, "c2"), Some(fid.clone()));
        assert!(h.world.router.is_in_room(&bo, &fid));

        h.transport.take();
        h.run("c1", "/fsay rally at the bank");
        let heard = h.transport.to(&bo, messages::CHAT_MESSAGE);
        assert_eq!(heard[0].payload["channel"], "faction");
    }

    #[test]
    fn disband_unlinks_everyone() {
        let h = Harness::new();
        let bo = h.join("c2", "Bo", Location::new("town", 8, 8));
        h.join("c1", "Ash", Location::new("town", 1, 1));
        h.run("c1", "/fcreate Wolves WLF");
        h.run("c1", "/finvite bo");
        h.run("c2", "/fjoin wolves");
        let fid = faction_of(&h, "c2").unwrap();

        h.run("c2", "/fdisband");
        assert!(h.errors("c2")[0].contains("leader"));
        h.run("c1", "/fdisband");
        assert_eq!(faction_of(&h, "c1"), None);
        assert_eq!(faction_of(&h, "c2"), None);
        assert!(!h.world.router.is_in_room(&bo, &fid));
        assert!(h.world.factions.snapshot(&fid).is_none());

        h.run("c2", "/fleave");
        assert_eq!(h.errors("c2").last().unwrap(), "You are not in a faction.");
    }

    #[test]
    fn kick_and_leave() {
        let h = Harness::new();
        h.join("c3", "Cy", Location::new("town", 8, 8));
        h.join("c2", "Bo", Location::new("town", 8, 8));
        h.join("c1", "Ash", Location::new("town", 1, 1));
        h.run("c1", "/fcreate Wolves WLF");
        for (id, name) in [("c2", "bo"), ("c3", "cy")] {
            h.run("c1", &format!("/finvite {}", name));
            h.run(id, "/fjoin WLF");
        }
        h.run("c1", "/fkick Bo");
        assert_eq!(faction_of(&h, "c2"), None);
        h.run("c3", "/fleave");
        assert_eq!(faction_of(&h, "c3"), None);
        h.run("c1", "/fleave");
        assert!(h.errors("c1").last().unwrap().contains("cannot leave"));
        let fid = faction_of(&h, "c1").unwrap();
        assert_eq!(h.world.factions.snapshot(&fid).unwrap().members.len(), 1);
    }

    #[test]
    fn duplicate_names_and_bad_tags_are_refused() {
        let h = Harness::new();
        h.join("c2", "Bo", Location::new("town", 8, 8));
        h.join("c1", "Ash", Location::new("town", 1, 1));
        h.run("c1", "/fcreate Wolves WLF");
        h.run("c2", "/fcreate wolves XYZ");
        assert!(h.errors("c2")[0].contains("already exists"));
        h.run("c2", "/fcreate Bears B-R");
        assert!(h.errors("c2")[1].contains("letters and numbers"));
    }
}
