use std::collections::HashSet;
use std::sync::Arc;

use tracing::warn;

use ripple_types::models::{Post, PostAuthor};

/// Field-level change to an embedded author snapshot.
/// `None` leaves the field alone; `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorPatch {
    pub username: Option<Option<String>>,
    pub avatar_url: Option<Option<String>>,
}

impl AuthorPatch {
    pub fn avatar(avatar_url: Option<String>) -> Self {
        Self {
            username: None,
            avatar_url: Some(avatar_url),
        }
    }

    pub fn username(mut self, username: Option<String>) -> Self {
        self.username = Some(username);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.avatar_url.is_none()
    }

    /// The patched author, or `None` when the patch would change nothing.
    pub fn apply(&self, author: &PostAuthor) -> Option<PostAuthor> {
        let mut next = author.clone();
        if let Some(username) = &self.username {
            next.username = username.clone();
        }
        if let Some(avatar_url) = &self.avatar_url {
            next.avatar_url = avatar_url.clone();
        }
        (next != *author).then_some(next)
    }
}

/// Outcome of one patch pass over the view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchStats {
    /// Posts whose author id matched.
    pub matched: usize,
    /// Posts that were actually replaced with a new value.
    pub changed: usize,
}

/// Ordered, newest-first list of posts as the view layer sees them.
///
/// Entries are shared: a patch swaps in a fresh `Arc` only for posts whose
/// value changes, so unchanged posts keep pointer identity across patches.
#[derive(Debug, Clone, Default)]
pub struct PostView {
    posts: Vec<Arc<Post>>,
}

impl PostView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole view. Sorting is stable, so posts with equal
    /// timestamps keep the order the backend returned them in.
    pub fn replace_all(&mut self, posts: Vec<Post>) {
        let mut seen = HashSet::with_capacity(posts.len());
        let mut next: Vec<Arc<Post>> = Vec::with_capacity(posts.len());
        for post in posts {
            if !seen.insert(post.id.clone()) {
                warn!("Dropping duplicate post {} from load result", post.id);
                continue;
            }
            next.push(Arc::new(post));
        }
        next.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.posts = next;
    }

    pub fn patch_by_user_id(&mut self, user_id: &str, patch: &AuthorPatch) -> PatchStats {
        let mut stats = PatchStats::default();
        if patch.is_empty() {
            return stats;
        }

        for entry in self.posts.iter_mut() {
            if entry.user.id != user_id {
                continue;
            }
            stats.matched += 1;
            if let Some(user) = patch.apply(&entry.user) {
                let mut post = Post::clone(entry);
                post.user = user;
                *entry = Arc::new(post);
                stats.changed += 1;
            }
        }
        stats
    }

    pub fn clear(&mut self) {
        self.posts.clear();
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Post>> {
        self.posts.iter()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Post>> {
        self.posts.iter().find(|p| p.id == id)
    }

    /// Cheap copy for publishing: clones the `Arc`s, not the posts.
    pub fn snapshot(&self) -> Vec<Arc<Post>> {
        self.posts.clone()
    }
}
