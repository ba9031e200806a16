/// View-local selection state for a post list
///
/// Tracks which post's options menu is open and the edit-mode draft. Kept
/// apart from the reconciler: none of this is shared with the backend.
use crate::post::{Post, PostId};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PostMenuState {
    #[default]
    Closed,
    /// Options menu open for one post
    Options(PostId),
    /// Editing one post's content
    Editing { post_id: PostId, draft: String },
}

impl PostMenuState {
    /// Open the options menu for `post_id`, or close it if already open
    pub fn toggle_options(&mut self, post_id: &PostId) {
        *self = match &*self {
            PostMenuState::Options(open) if open == post_id => PostMenuState::Closed,
            _ => PostMenuState::Options(post_id.clone()),
        };
    }

    /// Enter edit mode seeded with the post's current content
    pub fn start_edit(&mut self, post: &Post) {
        *self = PostMenuState::Editing {
            post_id: post.id.clone(),
            draft: post.content.clone(),
        };
    }

    pub fn update_draft(&mut self, text: impl Into<String>) {
        if let PostMenuState::Editing { draft, .. } = self {
            *draft = text.into();
        }
    }

    /// Leave edit mode, returning the post id and draft to save
    pub fn take_edit(&mut self) -> Option<(PostId, String)> {
        match std::mem::take(self) {
            PostMenuState::Editing { post_id, draft } => Some((post_id, draft)),
            other => {
                *self = other;
                None
            }
        }
    }

    pub fn cancel(&mut self) {
        *self = PostMenuState::Closed;
    }

    pub fn options_open_for(&self, post_id: &PostId) -> bool {
        matches!(self, PostMenuState::Options(open) if open == post_id)
    }

    pub fn is_editing(&self) -> bool {
        matches!(self, PostMenuState::Editing { .. })
    }

    pub fn editing(&self, post_id: &PostId) -> bool {
        matches!(self, PostMenuState::Editing { post_id: id, .. } if id == post_id)
    }

    /// Drop selection pointing at a post that is no longer rendered
    pub fn retain_visible(&mut self, posts: &[Post]) {
        let selected = match &*self {
            PostMenuState::Closed => return,
            PostMenuState::Options(id) => id,
            PostMenuState::Editing { post_id, .. } => post_id,
        };
        if !posts.iter().any(|p| &p.id == selected) {
            *self = PostMenuState::Closed;
        }
    }
}
