//! In-memory board state: the object registry and user presence.
//!
//! Pure and synchronous; all I/O and concurrency live in the sync actor,
//! which is the only owner of a `Board`.

use crate::objects::{BoardObject, ObjectId};
use crate::types::{ObjectUpdate, UserName};
use kurbo::{Point, Vec2};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct Board {
    objects: HashMap<ObjectId, BoardObject>,
    /// User name to the id of that user's cursor placeholder.
    users: HashMap<UserName, ObjectId>,
}

impl Board {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_object(&mut self, object: BoardObject) -> ObjectId {
        let id = object.id();
        self.objects.insert(id, object);
        id
    }

    /// Removes the given ids and returns the subset that was actually
    /// present. Deleting an absent id is a no-op.
    pub fn delete_objects(&mut self, ids: &[ObjectId]) -> Vec<ObjectId> {
        ids.iter()
            .filter(|id| self.objects.remove(id).is_some())
            .copied()
            .collect()
    }

    /// Translates every present id by `offset` and returns the subset that
    /// was actually moved. Absent ids are skipped without error.
    pub fn move_objects(&mut self, offset: Vec2, ids: &[ObjectId]) -> Vec<ObjectId> {
        ids.iter()
            .filter(|id| {
                self.objects.get_mut(id).is_some_and(|object| {
                    object.translate(offset);
                    true
                })
            })
            .copied()
            .collect()
    }

    /// Applies an update to the object with the given id. Returns false if
    /// the object is absent or the update does not fit its type.
    pub fn update_object(&mut self, id: ObjectId, update: &ObjectUpdate) -> bool {
        self.objects
            .get_mut(&id)
            .is_some_and(|object| object.apply(update))
    }

    /// Replaces the whole user-object registry. Presence placeholders are
    /// not user objects and survive the replacement.
    pub fn set_objects(&mut self, objects: Vec<BoardObject>) {
        self.objects.retain(|_, object| !object.is_user_object());
        for object in objects {
            self.objects.insert(object.id(), object);
        }
    }

    #[must_use]
    pub fn object(&self, id: ObjectId) -> Option<&BoardObject> {
        self.objects.get(&id)
    }

    /// A snapshot of all user objects, as pushed to a newly joined peer.
    #[must_use]
    pub fn user_objects(&self) -> Vec<BoardObject> {
        self.objects
            .values()
            .filter(|object| object.is_user_object())
            .cloned()
            .collect()
    }

    /// Registers a named presence, creating a cursor placeholder for it.
    /// A name that is already known keeps its existing cursor.
    pub fn add_user(&mut self, name: &str) -> ObjectId {
        if let Some(id) = self.users.get(name) {
            return *id;
        }
        let cursor = BoardObject::cursor(Point::ZERO);
        let id = self.add_object(cursor);
        self.users.insert(name.to_string(), id);
        id
    }

    /// Moves the named presence's cursor. Unknown names are ignored.
    pub fn move_user_cursor(&mut self, name: &str, pos: Point) -> bool {
        let Some(id) = self.users.get(name) else {
            return false;
        };
        self.objects.get_mut(id).is_some_and(|cursor| {
            cursor.set_pos(pos);
            true
        })
    }

    /// Drops the named presence and its cursor placeholder.
    pub fn remove_user(&mut self, name: &str) -> bool {
        let Some(id) = self.users.remove(name) else {
            return false;
        };
        self.objects.remove(&id);
        true
    }

    /// Drops every known presence, returning the affected names. Used when
    /// a client loses its server connection.
    pub fn clear_users(&mut self) -> Vec<UserName> {
        let names: Vec<UserName> = self.users.keys().cloned().collect();
        for name in &names {
            self.remove_user(name);
        }
        names
    }

    #[must_use]
    pub fn users(&self) -> Vec<UserName> {
        self.users.keys().cloned().collect()
    }

    #[must_use]
    pub fn cursor_of(&self, name: &str) -> Option<&BoardObject> {
        self.users.get(name).and_then(|id| self.objects.get(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::factories::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn delete_is_idempotent() {
        let mut board = Board::new();
        let id = board.add_object(rect_object(0.0, 0.0, 10.0, 10.0, red()));

        assert_eq!(board.delete_objects(&[id]), vec![id]);
        assert_eq!(board.delete_objects(&[id]), Vec::<ObjectId>::new());
    }

    #[test]
    fn delete_reports_only_present_ids() {
        let mut board = Board::new();
        let present = board.add_object(rect_object(0.0, 0.0, 10.0, 10.0, red()));
        let absent = rect_object(5.0, 5.0, 1.0, 1.0, red()).id();

        assert_eq!(board.delete_objects(&[absent, present]), vec![present]);
    }

    #[test]
    fn move_is_invertible() {
        let mut board = Board::new();
        let id = board.add_object(rect_object(3.0, 4.0, 10.0, 10.0, red()));
        let origin = board.object(id).expect("object exists").pos();
        let offset = Vec2::new(17.0, -6.5);

        board.move_objects(offset, &[id]);
        board.move_objects(-offset, &[id]);

        assert_eq!(board.object(id).expect("object exists").pos(), origin);
    }

    #[test]
    fn move_skips_absent_ids() {
        let mut board = Board::new();
        let present = board.add_object(rect_object(0.0, 0.0, 10.0, 10.0, red()));
        let absent = rect_object(0.0, 0.0, 1.0, 1.0, red()).id();

        let moved = board.move_objects(Vec2::new(1.0, 1.0), &[absent, present]);
        assert_eq!(moved, vec![present]);
    }

    #[test]
    fn update_for_absent_object_is_ignored() {
        let mut board = Board::new();
        let id = rect_object(0.0, 0.0, 1.0, 1.0, red()).id();

        assert!(!board.update_object(
            id,
            &ObjectUpdate::Resize {
                width: 5.0,
                height: 5.0
            }
        ));
    }

    #[test]
    fn set_objects_replaces_user_objects_but_keeps_cursors() {
        let mut board = Board::new();
        board.add_object(rect_object(0.0, 0.0, 10.0, 10.0, red()));
        board.add_user("ada");

        let replacement = text_object(1.0, 1.0, "fresh");
        let replacement_id = replacement.id();
        board.set_objects(vec![replacement]);

        assert_eq!(
            board.user_objects().iter().map(|o| o.id()).collect::<Vec<_>>(),
            vec![replacement_id]
        );
        assert!(board.cursor_of("ada").is_some());
    }

    #[test]
    fn snapshot_excludes_cursors() {
        let mut board = Board::new();
        board.add_user("ada");
        board.add_object(rect_object(0.0, 0.0, 10.0, 10.0, red()));

        assert_eq!(board.user_objects().len(), 1);
    }

    #[test]
    fn adding_a_known_user_keeps_the_cursor() {
        let mut board = Board::new();
        let first = board.add_user("ada");
        board.move_user_cursor("ada", Point::new(5.0, 5.0));

        let second = board.add_user("ada");

        assert_eq!(first, second);
        assert_eq!(
            board.cursor_of("ada").expect("cursor exists").pos(),
            Point::new(5.0, 5.0)
        );
    }

    #[test]
    fn cursor_moves_for_unknown_users_are_ignored() {
        let mut board = Board::new();
        assert!(!board.move_user_cursor("ghost", Point::new(1.0, 1.0)));
    }

    #[test]
    fn removing_a_user_drops_the_cursor_object() {
        let mut board = Board::new();
        let cursor_id = board.add_user("ada");

        assert!(board.remove_user("ada"));
        assert!(board.object(cursor_id).is_none());
        assert!(!board.remove_user("ada"));
    }

    #[test]
    fn clear_users_reports_every_name() {
        let mut board = Board::new();
        board.add_user("ada");
        board.add_user("grace");

        let mut names = board.clear_users();
        names.sort();

        assert_eq!(names, vec!["ada".to_string(), "grace".to_string()]);
        assert!(board.users().is_empty());
    }
}
